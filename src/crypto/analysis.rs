use itertools::Itertools;
use snafu::ResultExt;

use crate::crypto::common::repeating_block;
use crate::crypto::oracle::Oracle;
use crate::util::{Error, OracleFailureSnafu, Phase};

#[cfg(test)]
use crate::crypto::oracle::{choose_random, ecb_infix_oracle, get_id_oracle, OracleResult};

pub mod byte_by_byte;

// Ceiling on growing-message probes before a detection loop gives up on a
// non-conforming oracle.
const MAX_PROBE_GROWTH: usize = 512;

pub(crate) fn query(oracle: &dyn Oracle, msg: &[u8], phase: Phase) -> Result<Vec<u8>, Error> {
    oracle(msg).context(OracleFailureSnafu { phase })
}

// Given an oracle of the form
// (block cipher under a fixed key) . (fixed lpad ++) . (++ fixed rpad)
// determine the block size in use: grow the message one zero byte at a time
// until the padded ciphertext first jumps by a whole block.
pub fn detect_block_size(oracle: &dyn Oracle) -> Result<usize, Error> {
    let initial_len = query(oracle, &[], Phase::BlockSize)?.len();
    let mut msg = Vec::new();
    while msg.len() < MAX_PROBE_GROWTH {
        msg.push(0x00);
        let len = query(oracle, &msg, Phase::BlockSize)?.len();
        if len > initial_len {
            return Ok(len - initial_len);
        }
    }
    Err(Error::DetectionStalled {
        phase: Phase::BlockSize,
        probed: MAX_PROBE_GROWTH,
    })
}

#[test]
fn test_detect_block_size() {
    let oracle = ecb_infix_oracle(7, b"some unknown suffix");
    assert_eq!(Ok(16), detect_block_size(&oracle));

    // affix lengths must not influence the result
    let oracle = get_id_oracle()
        .pullback_add_random_left_padding::<0, 40>()
        .pullback_add_random_right_padding::<0, 40>()
        .pushforward_ecb_encrypt_fixed_key();
    assert_eq!(Ok(16), detect_block_size(&oracle));

    let oracle = get_id_oracle()
        .pullback_add_random_right_padding::<5, 10>()
        .pushforward_cbc_encrypt_fixed_key();
    assert_eq!(Ok(16), detect_block_size(&oracle));
}

#[test]
fn test_detect_block_size_stalls_on_constant_length_oracle() {
    let oracle = |_: &[u8]| -> OracleResult { Ok(vec![0u8; 32]) };
    assert_eq!(
        Err(Error::DetectionStalled {
            phase: Phase::BlockSize,
            probed: MAX_PROBE_GROWTH,
        }),
        detect_block_size(&oracle)
    );
}

// Heuristic, not proof: a mode hiding the plaintext structure makes two
// equal blocks a ~n^2 * 2^-128 event, while ECB produces them whenever the
// plaintext repeats. False negatives happen when the plaintext simply has
// no repeated block, so callers wanting a reliable signal must force
// repetition (see detect_ecb).
pub fn looks_like_ecb(ctxt: &[u8], block_size: usize) -> bool {
    if ctxt.len() % block_size != 0 {
        return false;
    }
    repeating_block(ctxt, block_size).is_some()
}

#[test]
fn test_looks_like_ecb() {
    // ciphertext with a four-fold repeated block
    let ctxt = hex!(
        "d880619740a8a19b7840a8a31c810a3d08649af70dc06f4fd5d2d69c744cd283"
        "e2dd052f6b641dbf9d11b0348542bb5708649af70dc06f4fd5d2d69c744cd283"
        "9475c9dfdbc1d46597949d9c7e82bf5a08649af70dc06f4fd5d2d69c744cd283"
        "97a93eab8d6aecd566489154789a6b0308649af70dc06f4fd5d2d69c744cd283"
        "d403180c98c8f6db1f2a3f9c4040deb0ab51b29933f2c123c58386b06fba186a"
    );
    assert!(looks_like_ecb(&ctxt, 16));

    // non-block-aligned input is rejected outright
    assert!(!looks_like_ecb(&ctxt[..17], 16));

    // CBC output of a repetitive plaintext has no repeating blocks
    let oracle = get_id_oracle().pushforward_cbc_encrypt_fixed_key();
    let ctxt = oracle(&vec![b'A'; 64]).unwrap();
    assert!(!looks_like_ecb(&ctxt, 16));
}

// Confirmatory oracle-driven check: four blocks of a constant byte leave at
// least two fully attacker-controlled aligned blocks no matter which fixed
// affixes the oracle adds.
pub fn detect_ecb(oracle: &dyn Oracle, block_size: usize) -> Result<bool, Error> {
    let probe = vec![b'A'; 4 * block_size];
    let ctxt = query(oracle, &probe, Phase::Mode)?;
    Ok(looks_like_ecb(&ctxt, block_size))
}

#[test]
fn test_detect_ecb() {
    for _ in 0..50 {
        let ecb_oracle = get_id_oracle()
            .pullback_add_random_left_padding::<5, 10>()
            .pullback_add_random_right_padding::<5, 10>()
            .pushforward_ecb_encrypt_fixed_key();
        let cbc_oracle = get_id_oracle()
            .pullback_add_random_left_padding::<5, 10>()
            .pullback_add_random_right_padding::<5, 10>()
            .pushforward_cbc_encrypt_fixed_key();
        let (ran_ecb, oracle) = choose_random(ecb_oracle, cbc_oracle);
        assert_eq!(Ok(ran_ecb), detect_ecb(&oracle, 16));
    }
}

// Grow the message until the padding is forced into one extra block. At
// that point the unpadded plaintext (message plus the oracle's hidden
// bytes) is exactly block-aligned, which isolates the hidden length. For an
// oracle that also prepends a hidden prefix the result includes the prefix
// bytes; the recovery entry points run this behind the alignment wrapper
// where the prefix is already cancelled out.
pub fn detect_secret_length(oracle: &dyn Oracle, block_size: usize) -> Result<usize, Error> {
    let initial_len = query(oracle, &[], Phase::SecretLength)?.len();
    let mut msg = Vec::new();
    for _ in 0..block_size {
        msg.push(0x00);
        let len = query(oracle, &msg, Phase::SecretLength)?.len();
        if len != initial_len {
            let delta = len as i64 - initial_len as i64;
            if delta != block_size as i64 {
                return Err(Error::UnexpectedLengthDelta {
                    phase: Phase::SecretLength,
                    expected: block_size,
                    actual: delta,
                });
            }
            // the unpadded plaintext is exactly block-aligned here; a
            // shortfall means the oracle does not pad-always as assumed
            return (len - block_size)
                .checked_sub(msg.len())
                .ok_or(Error::UnexpectedLengthDelta {
                    phase: Phase::SecretLength,
                    expected: block_size,
                    actual: delta,
                });
        }
    }
    Err(Error::DetectionStalled {
        phase: Phase::SecretLength,
        probed: block_size,
    })
}

#[test]
fn test_detect_secret_length() {
    for secret_len in [0usize, 1, 16, 17, 31, 32] {
        let secret = vec![0x5a; secret_len];
        let oracle = ecb_infix_oracle(0, &secret);
        assert_eq!(Ok(secret_len), detect_secret_length(&oracle, 16));
    }
}

#[test]
fn test_detect_secret_length_rejects_bad_delta() {
    // a length jump of two blocks violates the padding model and must not
    // be folded into a wrong answer
    let oracle = |msg: &[u8]| -> OracleResult {
        Ok(vec![0u8; if msg.len() < 3 { 32 } else { 64 }])
    };
    assert_eq!(
        Err(Error::UnexpectedLengthDelta {
            phase: Phase::SecretLength,
            expected: 16,
            actual: 32,
        }),
        detect_secret_length(&oracle, 16)
    );
}

// Length of the oracle's hidden prefix, detected in two steps: the block
// the prefix ends in, then its byte offset inside that block.
pub fn detect_prefix_length(oracle: &dyn Oracle, block_size: usize) -> Result<usize, Error> {
    let boundary = prefix_boundary_block(oracle, block_size)?;

    // Three scans with distinct marker bytes. A prefix tail or secret head
    // equal to one marker skews that marker's estimate, and no byte value
    // can collide with more than one marker, so the median survives a
    // single skewed estimate in either direction.
    let mut estimates = [
        marker_alignment(oracle, block_size, boundary, b'A')?,
        marker_alignment(oracle, block_size, boundary, b'B')?,
        marker_alignment(oracle, block_size, boundary, b'C')?,
    ];
    estimates.sort_unstable();
    Ok(estimates[1])
}

// The first ciphertext block differing between two distinct single-byte
// messages is the block the prefix ends in.
fn prefix_boundary_block(oracle: &dyn Oracle, block_size: usize) -> Result<usize, Error> {
    let c1 = query(oracle, &[0x00], Phase::Alignment)?;
    let c2 = query(oracle, &[0x01], Phase::Alignment)?;
    let blocks = c1.len() / block_size;
    c1.chunks(block_size)
        .zip(c2.chunks(block_size))
        .position(|(a, b)| a != b)
        .ok_or(Error::DetectionStalled {
            phase: Phase::Alignment,
            probed: blocks,
        })
}

// Grow a marker run of fill + 2*block_size identical bytes until two
// consecutive identical ciphertext blocks appear at the prefix boundary;
// the fill then tells how many prefix bytes occupy the boundary block.
fn marker_alignment(
    oracle: &dyn Oracle,
    block_size: usize,
    boundary: usize,
    marker: u8,
) -> Result<usize, Error> {
    for fill in 0..block_size {
        let probe = vec![marker; fill + 2 * block_size];
        let ctxt = query(oracle, &probe, Phase::Alignment)?;
        let repeated = ctxt
            .chunks(block_size)
            .skip(boundary)
            .take(3)
            .tuple_windows()
            .any(|(a, b)| a == b);
        if repeated {
            return Ok(boundary * block_size + (block_size - fill) % block_size);
        }
    }
    Err(Error::DetectionStalled {
        phase: Phase::Alignment,
        probed: block_size,
    })
}

#[test]
fn test_detect_prefix_length() {
    for prefix_len in [0usize, 1, 5, 15, 16, 17, 31, 37] {
        let oracle = ecb_infix_oracle(prefix_len, b"attack at dawn");
        assert_eq!(Ok(prefix_len), detect_prefix_length(&oracle, 16));
    }
}

#[test]
fn test_detect_prefix_length_with_empty_secret() {
    let oracle = ecb_infix_oracle(9, b"");
    assert_eq!(Ok(9), detect_prefix_length(&oracle, 16));
}
