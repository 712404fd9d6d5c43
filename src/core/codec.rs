//! Purpose: Convert between non-negative integers and strings over an `Alphabet`.
//! Exports: `encode`, `decode`, `keyspace_length`, `class_size`.
//! Role: Pure numeral codec used to seed enumerators and to name block boundaries.
//! Invariants: `decode(encode(x)) == x` for every `x`; output is most-significant first.
//! Invariants: Conversion is iterative and unbounded in precision (no recursion, no u64 caps).
use num_bigint::BigUint;
use num_traits::{Zero, pow};

use crate::core::alphabet::Alphabet;
use crate::core::error::{Error, ErrorKind};

/// Renders `value` in base `alphabet.base()`; zero is the first symbol.
pub fn encode(value: &BigUint, alphabet: &Alphabet) -> String {
    if value.is_zero() {
        return alphabet.first().to_string();
    }

    let base = BigUint::from(alphabet.base());
    let mut rest = value.clone();
    let mut digits = Vec::new();
    while !rest.is_zero() {
        let remainder = &rest % &base;
        // remainder < base, so it fits in the lowest u64 digit.
        let index = remainder.iter_u64_digits().next().unwrap_or(0) as usize;
        digits.push(index);
        rest /= &base;
    }
    digits.reverse();
    alphabet.render(&digits)
}

pub fn decode(value: &str, alphabet: &Alphabet) -> Result<BigUint, Error> {
    if value.is_empty() {
        return Err(Error::new(ErrorKind::InvalidSymbol).with_message("cannot decode an empty value"));
    }

    let base = BigUint::from(alphabet.base());
    let mut acc = BigUint::zero();
    for index in alphabet.indexes(value)? {
        acc *= &base;
        acc += index;
    }
    Ok(acc)
}

/// Number of strings sharing the length of `value`.
pub fn keyspace_length(value: &str, alphabet: &Alphabet) -> BigUint {
    class_size(alphabet, value.chars().count())
}

pub fn class_size(alphabet: &Alphabet, len: usize) -> BigUint {
    pow(BigUint::from(alphabet.base()), len)
}
