//! Purpose: Ordered symbol sets that define the base of a keyspace numeral system.
//! Exports: `Alphabet`, `DEFAULT_SYMBOLS`.
//! Role: Validated lookup table shared (cheaply cloned) by codec, enumerator and workers.
//! Invariants: Symbols are unique and there are at least two of them.
//! Invariants: `index_of` and `symbol` are exact inverses over `0..base`.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::error::{Error, ErrorKind};

/// Printable ASCII without the trailing tab/newline/return/vertical-tab/form-feed.
pub const DEFAULT_SYMBOLS: &str = concat!(
    "0123456789",
    "abcdefghijklmnopqrstuvwxyz",
    "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~",
    " ",
);

#[derive(Clone)]
pub struct Alphabet {
    inner: Arc<AlphabetInner>,
}

struct AlphabetInner {
    symbols: Vec<char>,
    index: HashMap<char, usize>,
}

impl Alphabet {
    pub fn new(symbols: &str) -> Result<Self, Error> {
        let symbols: Vec<char> = symbols.chars().collect();
        if symbols.len() < 2 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("alphabet needs at least two symbols")
                .with_hint("Pass a charset such as `-c 01` or omit it for printable ASCII."));
        }

        let mut index = HashMap::with_capacity(symbols.len());
        for (position, symbol) in symbols.iter().enumerate() {
            if index.insert(*symbol, position).is_some() {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("alphabet repeats symbol {symbol:?}")));
            }
        }

        Ok(Self {
            inner: Arc::new(AlphabetInner { symbols, index }),
        })
    }

    pub fn base(&self) -> usize {
        self.inner.symbols.len()
    }

    pub fn symbol(&self, index: usize) -> Option<char> {
        self.inner.symbols.get(index).copied()
    }

    pub fn index_of(&self, symbol: char) -> Option<usize> {
        self.inner.index.get(&symbol).copied()
    }

    pub fn first(&self) -> char {
        self.inner.symbols[0]
    }

    pub fn last(&self) -> char {
        self.inner.symbols[self.inner.symbols.len() - 1]
    }

    /// Maps every symbol of `value` to its index, failing on the first stranger.
    pub fn indexes(&self, value: &str) -> Result<Vec<usize>, Error> {
        value
            .chars()
            .map(|symbol| {
                self.index_of(symbol).ok_or_else(|| {
                    Error::new(ErrorKind::InvalidSymbol)
                        .with_message(format!("symbol {symbol:?} is not in the alphabet"))
                })
            })
            .collect()
    }

    pub fn render(&self, indexes: &[usize]) -> String {
        indexes.iter().map(|index| self.inner.symbols[*index]).collect()
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        let symbols: Vec<char> = DEFAULT_SYMBOLS.chars().collect();
        let index = symbols
            .iter()
            .enumerate()
            .map(|(position, symbol)| (*symbol, position))
            .collect();
        Self {
            inner: Arc::new(AlphabetInner { symbols, index }),
        }
    }
}

impl fmt::Debug for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alphabet")
            .field("base", &self.base())
            .field("symbols", &self.inner.symbols.iter().collect::<String>())
            .finish()
    }
}

impl PartialEq for Alphabet {
    fn eq(&self, other: &Self) -> bool {
        self.inner.symbols == other.inner.symbols
    }
}

impl Eq for Alphabet {}

#[cfg(test)]
mod tests {
    use super::{Alphabet, DEFAULT_SYMBOLS};
    use crate::core::error::ErrorKind;

    #[test]
    fn default_alphabet_is_printable_ascii_without_control_whitespace() {
        let alphabet = Alphabet::default();
        assert_eq!(alphabet.base(), 95);
        assert_eq!(alphabet.first(), '0');
        assert_eq!(alphabet.last(), ' ');
        assert!(!DEFAULT_SYMBOLS.contains('\t'));
        assert!(!DEFAULT_SYMBOLS.contains('\n'));
    }

    #[test]
    fn rejects_duplicates_and_tiny_alphabets() {
        let err = Alphabet::new("0120").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(Alphabet::new("x").unwrap_err().kind(), ErrorKind::Usage);
        assert_eq!(Alphabet::new("").unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn index_lookup_round_trips() {
        let alphabet = Alphabet::new("abc").unwrap();
        assert_eq!(alphabet.indexes("cab").unwrap(), vec![2, 0, 1]);
        assert_eq!(alphabet.render(&[2, 0, 1]), "cab");
        let err = alphabet.indexes("abd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSymbol);
    }
}
