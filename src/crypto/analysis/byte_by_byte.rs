use std::collections::HashMap;

use crate::crypto::analysis::{detect_prefix_length, detect_secret_length, query};
use crate::crypto::oracle::{Oracle, OracleResult};
use crate::util::{Error, OracleError, Phase};

#[cfg(test)]
use base64::{engine::general_purpose, Engine as _};
#[cfg(test)]
use openssl::symm::{encrypt, Cipher};
#[cfg(test)]
use crate::crypto::analysis::{detect_block_size, detect_ecb};
#[cfg(test)]
use crate::crypto::common::generate_random_bytes;
#[cfg(test)]
use crate::crypto::oracle::ecb_infix_oracle;

/// One full recovery run against a borrowed oracle: the detected (or given)
/// secret length, the growing window of known plaintext, and the bytes
/// recovered so far. Nothing outlives `run`.
pub struct AttackSession<'a> {
    oracle: &'a dyn Oracle,
    block_size: usize,
    secret_length: usize,
    window: Vec<u8>,
    recovered: Vec<u8>,
}

impl<'a> AttackSession<'a> {
    pub fn new(oracle: &'a dyn Oracle, block_size: usize) -> Result<Self, Error> {
        let secret_length = detect_secret_length(oracle, block_size)?;
        Ok(Self::with_secret_length(oracle, block_size, secret_length))
    }

    pub fn with_secret_length(
        oracle: &'a dyn Oracle,
        block_size: usize,
        secret_length: usize,
    ) -> Self {
        Self {
            oracle,
            block_size,
            secret_length,
            // seeded so the window can always supply block_size - 1 bytes
            window: vec![0u8; block_size - 1],
            recovered: Vec::with_capacity(secret_length),
        }
    }

    pub fn run(mut self) -> Result<Vec<u8>, Error> {
        while self.recovered.len() < self.secret_length {
            let byte = self.crack_next_byte()?;
            self.window.push(byte);
            self.recovered.push(byte);
        }
        Ok(self.recovered)
    }

    fn crack_next_byte(&self) -> Result<u8, Error> {
        let index = self.recovered.len();
        // index mod block_size secret bytes already sit in the block under
        // test; the fill tops it up so the unknown byte lands in its last
        // position
        let fill = self.block_size - (index % self.block_size) - 1;
        let target_block = self.target_block(index, fill)?;

        // One probe per candidate byte: the trailing block_size - 1 window
        // bytes followed by the candidate, exactly one block, so the first
        // ciphertext block is its encryption.
        let mut probe = self.window[self.window.len() - (self.block_size - 1)..].to_vec();
        probe.push(0x00);
        let mut lookup: HashMap<Vec<u8>, u8> = HashMap::new();
        for candidate in 0..=u8::MAX {
            probe[self.block_size - 1] = candidate;
            let ctxt = query(self.oracle, &probe, Phase::Recovery)?;
            let block = self.leading_block(&ctxt)?;
            lookup.insert(block, candidate);
        }

        lookup
            .get(&target_block)
            .copied()
            .ok_or(Error::BruteForceExhausted {
                index,
                target_block,
            })
    }

    fn target_block(&self, index: usize, fill: usize) -> Result<Vec<u8>, Error> {
        let ctxt = query(self.oracle, &vec![0u8; fill], Phase::Recovery)?;
        let start = (index / self.block_size) * self.block_size;
        ctxt.get(start..start + self.block_size)
            .map(|block| block.to_vec())
            .ok_or(Error::MalformedCiphertext {
                length: ctxt.len(),
                block_size: self.block_size,
            })
    }

    fn leading_block(&self, ctxt: &[u8]) -> Result<Vec<u8>, Error> {
        ctxt.get(..self.block_size)
            .map(|block| block.to_vec())
            .ok_or(Error::MalformedCiphertext {
                length: ctxt.len(),
                block_size: self.block_size,
            })
    }
}

pub fn recover_secret(oracle: &dyn Oracle, block_size: usize) -> Result<Vec<u8>, Error> {
    recover(oracle, block_size, None)
}

pub fn recover_secret_with_length(
    oracle: &dyn Oracle,
    block_size: usize,
    secret_length: usize,
) -> Result<Vec<u8>, Error> {
    recover(oracle, block_size, Some(secret_length))
}

fn recover(
    oracle: &dyn Oracle,
    block_size: usize,
    secret_length: Option<usize>,
) -> Result<Vec<u8>, Error> {
    let prefix_length = detect_prefix_length(oracle, block_size)?;
    let fill = (block_size - prefix_length % block_size) % block_size;
    let skip = prefix_length + fill;

    // Uniform alignment applied to every query: the fill completes the
    // prefix's last block and the prefix-covering ciphertext head is
    // stripped, so the session below sees a prefix-free oracle.
    let aligned = move |msg: &[u8]| -> OracleResult {
        let padded = [vec![0u8; fill], msg.to_vec()].concat();
        let ctxt = oracle(&padded)?;
        ctxt.get(skip..)
            .map(|tail| tail.to_vec())
            .ok_or_else(|| OracleError {
                message: format!(
                    "ciphertext of {} bytes ends before the {} byte prefix region",
                    ctxt.len(),
                    skip
                ),
            })
    };

    let session = match secret_length {
        Some(len) => AttackSession::with_secret_length(&aligned, block_size, len),
        None => AttackSession::new(&aligned, block_size)?,
    };
    session.run()
}

#[cfg(test)]
const UNKNOWN_STRING: &[u8] = b"Um9sbGluJyBpbiBteSA1LjAKV2l0aCBteSByYWctdG9wIGRvd24gc28gbXkgaGFpciBjYW4gYmxvdwpUaGUgZ2lybGllcyBvbiBzdGFuZGJ5IHdhdmluZyBqdXN0IHRvIHNheSBoaQpEaWQgeW91IHN0b3A/IE5vLCBJIGp1c3QgZHJvdmUgYnkK";

#[test]
fn test_recover_secret_end_to_end() {
    let secret = general_purpose::STANDARD
        .decode(UNKNOWN_STRING)
        .expect("Base64 decoding failed");
    let oracle = ecb_infix_oracle(0, &secret);

    let block_size = detect_block_size(&oracle).unwrap();
    assert_eq!(16, block_size);
    assert_eq!(Ok(true), detect_ecb(&oracle, block_size));
    assert_eq!(Ok(secret.len()), detect_secret_length(&oracle, block_size));
    assert_eq!(Ok(secret.clone()), recover_secret(&oracle, block_size));
}

#[test]
fn test_recover_secret_is_independent_of_prefix() {
    for secret_len in [0usize, 1, 15, 16, 17, 33] {
        let secret: Vec<u8> = (0..secret_len).map(|_| rand::random()).collect();
        for prefix_len in 0..20 {
            let oracle = ecb_infix_oracle(prefix_len, &secret);
            assert_eq!(Ok(secret.clone()), recover_secret(&oracle, 16));
        }
    }
}

#[test]
fn test_recover_secret_cost() {
    // one target query plus 256 candidate probes per byte
    let secret = b"Hello, this is a secret message appended after user input.";
    let (count, oracle) = ecb_infix_oracle(0, secret).with_call_count();
    let recovered = AttackSession::with_secret_length(&oracle, 16, secret.len())
        .run()
        .unwrap();
    assert_eq!(secret.to_vec(), recovered);
    assert_eq!(secret.len() * 257, count.get());
}

#[test]
fn test_recover_empty_secret_makes_no_queries() {
    let (count, oracle) = ecb_infix_oracle(0, b"").with_call_count();
    let recovered = AttackSession::with_secret_length(&oracle, 16, 0)
        .run()
        .unwrap();
    assert!(recovered.is_empty());
    assert_eq!(0, count.get());
}

#[test]
fn test_recover_secret_with_length() {
    let oracle = ecb_infix_oracle(13, b"known length");
    assert_eq!(
        Ok(b"known length".to_vec()),
        recover_secret_with_length(&oracle, 16, 12)
    );

    // a shorter requested length yields the leading bytes only
    assert_eq!(
        Ok(b"known".to_vec()),
        recover_secret_with_length(&oracle, 16, 5)
    );
}

#[test]
fn test_recover_secret_is_idempotent() {
    let oracle = ecb_infix_oracle(9, b"same bytes every run");
    let first = recover_secret(&oracle, 16).unwrap();
    let second = recover_secret(&oracle, 16).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_brute_force_exhaustion_on_nondeterministic_oracle() {
    // a fresh key per call keeps ciphertext lengths stable but breaks the
    // determinism the probe table relies on
    let oracle = |buf: &[u8]| -> OracleResult {
        let key: [u8; 16] = generate_random_bytes();
        let msg = [buf, b"stable length secret".as_slice()].concat();
        encrypt(Cipher::aes_128_ecb(), &key, None, &msg)
            .map_err(|e| OracleError { message: e.to_string() })
    };
    let err = AttackSession::with_secret_length(&oracle, 16, 20)
        .run()
        .unwrap_err();
    assert!(matches!(err, Error::BruteForceExhausted { index: 0, .. }));
}

#[test]
fn test_oracle_failure_carries_phase() {
    let oracle = |_: &[u8]| -> OracleResult {
        Err(OracleError {
            message: "connection reset by peer".to_string(),
        })
    };
    assert!(matches!(
        detect_block_size(&oracle),
        Err(Error::OracleFailure {
            phase: Phase::BlockSize,
            ..
        })
    ));
    assert!(matches!(
        recover_secret(&oracle, 16),
        Err(Error::OracleFailure {
            phase: Phase::Alignment,
            ..
        })
    ));
}
