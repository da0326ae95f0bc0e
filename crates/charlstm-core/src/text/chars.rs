//! Per-character features: embedding bucket and character class.

use serde::{Deserialize, Serialize};

/// Default number of character embedding buckets.
pub const CHAR_BUCKETS: usize = 128;

/// Coarse character class fed through the auxiliary embedding channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharClass {
    Lowercase,
    Uppercase,
    Punctuation,
    Other,
}

impl CharClass {
    /// Number of distinct classes (type embedding rows).
    pub const NUM_CLASSES: usize = 4;

    /// Classify a character. Only ASCII letters and punctuation get a
    /// dedicated class.
    pub fn of(c: char) -> Self {
        if c.is_ascii_lowercase() {
            CharClass::Lowercase
        } else if c.is_ascii_uppercase() {
            CharClass::Uppercase
        } else if c.is_ascii_punctuation() {
            CharClass::Punctuation
        } else {
            CharClass::Other
        }
    }

    /// Row index in the type embedding.
    pub fn index(self) -> u32 {
        match self {
            CharClass::Lowercase => 0,
            CharClass::Uppercase => 1,
            CharClass::Punctuation => 2,
            CharClass::Other => 3,
        }
    }
}

/// Embedding bucket of `c`: its code point modulo `buckets`.
pub fn char_bucket(c: char, buckets: usize) -> u32 {
    (c as u32) % buckets as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_classes() {
        assert_eq!(CharClass::of('a'), CharClass::Lowercase);
        assert_eq!(CharClass::of('Z'), CharClass::Uppercase);
        assert_eq!(CharClass::of('!'), CharClass::Punctuation);
        assert_eq!(CharClass::of('~'), CharClass::Punctuation);
        assert_eq!(CharClass::of('7'), CharClass::Other);
        assert_eq!(CharClass::of(' '), CharClass::Other);
        assert_eq!(CharClass::of('é'), CharClass::Other);
        assert_eq!(CharClass::of('Ä'), CharClass::Other);
    }

    #[test]
    fn test_class_indices_are_dense() {
        let mut seen: Vec<u32> = ['a', 'A', '.', '0'].iter().map(|&c| CharClass::of(c).index()).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_char_bucket_wraps() {
        assert_eq!(char_bucket('A', CHAR_BUCKETS), 65);
        assert_eq!(char_bucket('é', CHAR_BUCKETS), 0xE9 % 128);
        assert!(char_bucket('語', CHAR_BUCKETS) < CHAR_BUCKETS as u32);
    }
}
