//! Purpose: Plan keyspace ranges and cut them into bounded, contiguous work blocks.
//! Exports: `Block`, `KeyRange`, `Partition`, `partition`, `compute_range`, `auto_block_size`.
//! Role: Pure planning layer feeding both the queue distributor and the local pool.
//! Invariants: Blocks are half-open, contiguous, non-overlapping and clipped to the range end.
//! Invariants: All arithmetic is arbitrary precision; no input can overflow.
use std::fmt;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use crate::core::alphabet::Alphabet;
use crate::core::codec;
use crate::core::error::{Error, ErrorKind};

/// Upper bound on the number of blocks the local pool cuts a range into by default.
pub const LOCAL_BLOCK_TARGET: u64 = 32_000;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(with = "crate::core::wire::ordinal")]
    pub start: BigUint,
    #[serde(with = "crate::core::wire::ordinal")]
    pub stop: BigUint,
}

impl Block {
    pub fn new(start: impl Into<BigUint>, stop: impl Into<BigUint>) -> Self {
        Self {
            start: start.into(),
            stop: stop.into(),
        }
    }

    pub fn len(&self) -> BigUint {
        if self.stop > self.start {
            &self.stop - &self.start
        } else {
            BigUint::zero()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    /// Deterministic artifact name, shared by the local file and the sink key.
    pub fn output_name(&self) -> String {
        format!("generated_keyspace_{}_{}.json", self.start, self.stop)
    }

    pub fn to_body(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode block body")
                .with_source(err)
        })
    }

    pub fn from_body(body: &str) -> Result<Self, Error> {
        serde_json::from_str(body).map_err(|err| {
            Error::new(ErrorKind::Queue)
                .with_message("malformed block body")
                .with_source(err)
        })
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyRange {
    pub start: BigUint,
    pub end: BigUint,
}

impl KeyRange {
    pub fn entries(&self) -> BigUint {
        if self.end > self.start {
            &self.end - &self.start
        } else {
            BigUint::zero()
        }
    }

    /// Narrows the range; each offset is ignored when it would run past the end.
    pub fn with_offsets(mut self, skip: Option<&BigUint>, limit: Option<&BigUint>) -> Self {
        if let Some(skip) = skip {
            if &self.start + skip < self.end {
                self.start += skip;
            }
        }
        if let Some(limit) = limit {
            if &self.start + limit <= self.end {
                self.end = &self.start + limit;
            }
        }
        self
    }
}

/// Range of ordinals for strings of `chars_len` symbols.
///
/// Exclusive mode starts one past the previous length class so shorter strings are not
/// enumerated twice; inclusive mode starts at zero.
pub fn compute_range(chars_len: usize, alphabet: &Alphabet, inclusive: bool) -> Result<KeyRange, Error> {
    if chars_len == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("keyspace length must be at least 1"));
    }
    let end = codec::class_size(alphabet, chars_len);
    let start = if inclusive {
        BigUint::zero()
    } else {
        codec::class_size(alphabet, chars_len - 1) + BigUint::one()
    };
    Ok(KeyRange { start, end })
}

pub fn auto_block_size(range: &KeyRange) -> BigUint {
    &range.end / LOCAL_BLOCK_TARGET + BigUint::one()
}

pub fn block_count(range: &KeyRange, block_size: &BigUint) -> BigUint {
    if block_size.is_zero() {
        return BigUint::zero();
    }
    let entries = range.entries();
    (&entries + block_size - BigUint::one()) / block_size
}

pub fn partition(start: &BigUint, end: &BigUint, block_size: &BigUint) -> Result<Partition, Error> {
    if block_size.is_zero() {
        return Err(Error::new(ErrorKind::InvalidBlockSize)
            .with_message("block size must be at least 1"));
    }
    Ok(Partition {
        next: start.clone(),
        end: end.clone(),
        block_size: block_size.clone(),
    })
}

/// Lazy block sequence produced by `partition`.
#[derive(Clone, Debug)]
pub struct Partition {
    next: BigUint,
    end: BigUint,
    block_size: BigUint,
}

impl Iterator for Partition {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.next >= self.end {
            return None;
        }
        let stop = (&self.next + &self.block_size).min(self.end.clone());
        let start = std::mem::replace(&mut self.next, stop.clone());
        Some(Block { start, stop })
    }
}
