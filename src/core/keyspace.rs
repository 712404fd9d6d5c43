//! Purpose: Enumerate a fixed-length keyspace from a seed like an odometer.
//! Exports: `KeyspaceEnumerator`, `MAX_SEED_LENGTH`.
//! Role: Stateful cursor driven by workers; one enumerator per block, never shared.
//! Invariants: Values keep the seed's length; the class terminal (all max symbols) ends it.
//! Invariants: An inclusive stop value ends enumeration as soon as it has been emitted.
//! Invariants: Forward-only; resume by re-seeding at the last emitted value.
use num_bigint::BigUint;

use crate::core::alphabet::Alphabet;
use crate::core::codec;
use crate::core::error::{Error, ErrorKind};

pub const MAX_SEED_LENGTH: usize = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CursorState {
    Fresh,
    Running,
    Done,
}

#[derive(Debug)]
pub struct KeyspaceEnumerator {
    alphabet: Alphabet,
    digits: Vec<usize>,
    stop: Option<Vec<usize>>,
    generated: u64,
    state: CursorState,
}

impl KeyspaceEnumerator {
    pub fn new(seed: &str, alphabet: &Alphabet) -> Result<Self, Error> {
        let len = seed.chars().count();
        if len > MAX_SEED_LENGTH {
            return Err(Error::new(ErrorKind::SeedTooLong)
                .with_message(format!("max seed length is {MAX_SEED_LENGTH}, got {len}")));
        }
        if len == 0 {
            return Err(Error::new(ErrorKind::InvalidSeed).with_message("seed is empty"));
        }
        let digits = alphabet.indexes(seed).map_err(|err| {
            let message = err.message().unwrap_or("seed symbol outside alphabet").to_string();
            Error::new(ErrorKind::InvalidSeed).with_message(message)
        })?;

        Ok(Self {
            alphabet: alphabet.clone(),
            digits,
            stop: None,
            generated: 0,
            state: CursorState::Fresh,
        })
    }

    /// Seeds at the canonical rendering of `ordinal`.
    pub fn from_ordinal(ordinal: &BigUint, alphabet: &Alphabet) -> Result<Self, Error> {
        Self::new(&codec::encode(ordinal, alphabet), alphabet)
    }

    /// Inclusive stop value; a stop of another length is never reached.
    pub fn with_stop(mut self, stop: &str) -> Result<Self, Error> {
        self.stop = Some(self.alphabet.indexes(stop)?);
        Ok(self)
    }

    pub fn with_stop_ordinal(self, stop: &BigUint) -> Result<Self, Error> {
        let stop = codec::encode(stop, &self.alphabet);
        self.with_stop(&stop)
    }

    /// Current register contents (the last emitted value once iteration started).
    pub fn value(&self) -> String {
        self.alphabet.render(&self.digits)
    }

    /// Number of values emitted so far, seed included.
    pub fn generated_count(&self) -> u64 {
        self.generated
    }

    pub fn is_done(&self) -> bool {
        self.state == CursorState::Done
    }

    /// Steps the register once; `None` when the class terminal or stop was already reached.
    pub fn advance(&mut self) -> Option<String> {
        if self.state == CursorState::Done || self.at_limit() {
            self.state = CursorState::Done;
            return None;
        }

        let base = self.alphabet.base();
        for digit in self.digits.iter_mut().rev() {
            *digit = (*digit + 1) % base;
            if *digit != 0 {
                break;
            }
        }
        self.state = CursorState::Running;
        self.generated += 1;
        Some(self.value())
    }

    fn at_limit(&self) -> bool {
        let max = self.alphabet.base() - 1;
        if self.digits.iter().all(|digit| *digit == max) {
            return true;
        }
        self.stop.as_deref() == Some(self.digits.as_slice())
    }
}

impl Iterator for KeyspaceEnumerator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        match self.state {
            CursorState::Fresh => {
                self.state = CursorState::Running;
                self.generated = 1;
                Some(self.value())
            }
            CursorState::Running => self.advance(),
            CursorState::Done => None,
        }
    }
}
