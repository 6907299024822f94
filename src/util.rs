use std::fmt;

use snafu::Snafu;

/// Stage of the attack pipeline an error surfaced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BlockSize,
    Mode,
    SecretLength,
    Alignment,
    Recovery,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::BlockSize    => "block size detection",
            Phase::Mode         => "mode detection",
            Phase::SecretLength => "secret length detection",
            Phase::Alignment    => "prefix alignment",
            Phase::Recovery     => "byte recovery",
        };
        f.write_str(name)
    }
}

// The only error an oracle itself may produce. Anything more structured
// would leak knowledge of the oracle's internals to the attacker side.
#[derive(Debug, Snafu, PartialEq)]
#[snafu(display("encryption oracle failed: {}", message))]
pub struct OracleError {
    pub message: String,
}

#[derive(Debug, Snafu, PartialEq)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    // A failing oracle cannot be trusted to keep its key and affixes fixed,
    // so these are never retried
    #[snafu(display("oracle query failed during {}", phase))]
    OracleFailure { phase: Phase, source: OracleError },

    #[snafu(display(
        "ciphertext length changed by {} bytes during {}, expected exactly {}",
        actual, phase, expected
    ))]
    UnexpectedLengthDelta {
        phase: Phase,
        expected: usize,
        actual: i64,
    },

    #[snafu(display(
        "no candidate byte matched target block {} at secret index {}",
        hex::encode(target_block), index
    ))]
    BruteForceExhausted {
        index: usize,
        target_block: Vec<u8>,
    },

    #[snafu(display(
        "ciphertext of {} bytes cannot supply a full {} byte block",
        length, block_size
    ))]
    MalformedCiphertext { length: usize, block_size: usize },

    #[snafu(display("{} made no progress after {} oracle queries", phase, probed))]
    DetectionStalled { phase: Phase, probed: usize },
}

#[test]
fn test_error_display_carries_context() {
    let err = Error::UnexpectedLengthDelta {
        phase: Phase::SecretLength,
        expected: 16,
        actual: 32,
    };
    let rendered = err.to_string();
    assert!(rendered.contains("secret length detection"));
    assert!(rendered.contains("32"));

    let err = Error::BruteForceExhausted {
        index: 7,
        target_block: vec![0xde, 0xad],
    };
    assert!(err.to_string().contains("dead"));
}
