use openssl::symm::{encrypt, Cipher};
use rand::{Rng, RngCore};
use std::cell::Cell;
use std::rc::Rc;

use crate::crypto::common::generate_random_bytes;
use crate::util::OracleError;

pub type OracleResult = Result<Vec<u8>, OracleError>;

pub trait Oracle: Fn(&[u8]) -> OracleResult {}
impl<T: Fn(&[u8]) -> OracleResult> Oracle for T {}

pub fn get_id_oracle() -> Box<dyn Oracle> {
    Box::new(move |buf: &[u8]| {
        Ok(buf.to_vec())
    })
}

// The standard chosen-infix attack target:
// ENC_k(random fixed prefix || attacker message || secret suffix)
// with key and prefix drawn once and reused for the oracle's lifetime.
pub fn ecb_infix_oracle(prefix_length: usize, secret: &[u8]) -> Box<dyn Oracle> {
    let mut prefix = vec![0u8; prefix_length];
    rand::thread_rng().fill_bytes(&mut prefix);
    get_id_oracle()
        .pullback_add_left_padding(&prefix)
        .pullback_add_right_padding(secret)
        .pushforward_ecb_encrypt_fixed_key()
}

pub fn choose_random<'a>(f: impl Oracle + 'a, g: impl Oracle + 'a) -> (bool, impl Oracle + 'a) {
    let mut rng = rand::thread_rng();
    let choose_f: bool = rng.gen();
    (choose_f, move |buf: &[u8]| {
        match choose_f {
            true  => f(buf),
            false => g(buf),
        }
    })
}

impl dyn Oracle {
    pub fn pullback_add_left_padding(self: Box<dyn Oracle>, lpad: &[u8]) -> Box<dyn Oracle> {
        let owned_lpad = lpad.to_owned();
        Box::new(move |buf: &[u8]| {
            let joined = [
                &owned_lpad,
                buf,
            ].concat();
            self(&joined)
        })
    }

    pub fn pullback_add_right_padding(self: Box<dyn Oracle>, rpad: &[u8]) -> Box<dyn Oracle> {
        let owned_rpad = rpad.to_owned();
        Box::new(move |buf: &[u8]| {
            let joined = [
                buf,
                &owned_rpad,
            ].concat();
            self(&joined)
        })
    }

    pub fn pullback_add_random_left_padding<const MIN: usize, const MAX: usize>(self: Box<dyn Oracle>) -> Box<dyn Oracle> {
        let mut rng = rand::thread_rng();
        let padding: [u8; MAX] = generate_random_bytes();
        let pad_len: usize = rng.gen_range(MIN..=MAX);
        self.pullback_add_left_padding(&padding[0..pad_len])
    }

    pub fn pullback_add_random_right_padding<const MIN: usize, const MAX: usize>(self: Box<dyn Oracle>) -> Box<dyn Oracle> {
        let mut rng = rand::thread_rng();
        let padding: [u8; MAX] = generate_random_bytes();
        let pad_len: usize = rng.gen_range(MIN..=MAX);
        self.pullback_add_right_padding(&padding[0..pad_len])
    }

    // openssl applies PKCS#7 itself, so the ciphertext always grows by a
    // whole block when the plaintext crosses a block boundary
    pub fn pushforward_ecb_encrypt_fixed_key(self: Box<dyn Oracle>) -> Box<dyn Oracle> {
        let cipher = Cipher::aes_128_ecb();
        let key: [u8; 16] = generate_random_bytes();
        Box::new(move |buf: &[u8]| {
            let plaintext = self(buf)?;
            encrypt(cipher, &key, None, &plaintext)
                .map_err(|e| OracleError { message: e.to_string() })
        })
    }

    pub fn pushforward_cbc_encrypt_fixed_key(self: Box<dyn Oracle>) -> Box<dyn Oracle> {
        let cipher = Cipher::aes_128_cbc();
        let key: [u8; 16] = generate_random_bytes();
        let iv: [u8; 16] = generate_random_bytes();
        Box::new(move |buf: &[u8]| {
            let plaintext = self(buf)?;
            encrypt(cipher, &key, Some(&iv), &plaintext)
                .map_err(|e| OracleError { message: e.to_string() })
        })
    }

    pub fn with_call_count(self: Box<dyn Oracle>) -> (Rc<Cell<usize>>, Box<dyn Oracle>) {
        let count = Rc::new(Cell::new(0usize));
        let inner_count = Rc::clone(&count);
        let counted = Box::new(move |buf: &[u8]| {
            inner_count.set(inner_count.get() + 1);
            self(buf)
        });
        (count, counted)
    }
}

#[test]
fn test_ecb_infix_oracle_is_deterministic() {
    let oracle = ecb_infix_oracle(11, b"some fixed suffix");
    let first = oracle(b"hello").unwrap();
    let second = oracle(b"hello").unwrap();
    assert_eq!(first, second);
    assert_eq!(0, first.len() % 16);
}

#[test]
fn test_with_call_count() {
    let (count, oracle) = get_id_oracle().with_call_count();
    assert_eq!(0, count.get());
    oracle(b"a").unwrap();
    oracle(b"b").unwrap();
    assert_eq!(2, count.get());
}
