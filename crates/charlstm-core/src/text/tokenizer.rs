//! # Word Tokenizer
//!
//! Splits input strings into the word sequence consumed by the word-level
//! LSTM. Case and punctuation are preserved: both carry signal for the
//! character-type channel.

/// A word extracted from an input string with positional information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The token text content
    pub text: String,
    /// Start byte position in the original string
    pub start: usize,
    /// End byte position in the original string
    pub end: usize,
    /// Token index in the sequence
    pub index: usize,
}

/// Whitespace tokenizer.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer;

impl Tokenizer {
    /// Create a new tokenizer instance.
    pub fn new() -> Self {
        Self
    }

    /// Tokenize a string into a sequence of words.
    ///
    /// # Examples
    /// ```
    /// use charlstm_core::text::Tokenizer;
    ///
    /// let tokenizer = Tokenizer::new();
    /// let tokens = tokenizer.tokenize("Hello, World!");
    /// assert_eq!(tokens.len(), 2);
    /// assert_eq!(tokens[1].text, "World!");
    /// ```
    pub fn tokenize(&self, input: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut current_start: Option<usize> = None;

        for (idx, c) in input.char_indices() {
            if c.is_whitespace() {
                if let Some(start) = current_start.take() {
                    tokens.push(Token {
                        text: input[start..idx].to_string(),
                        start,
                        end: idx,
                        index: tokens.len(),
                    });
                }
            } else if current_start.is_none() {
                current_start = Some(idx);
            }
        }

        if let Some(start) = current_start {
            tokens.push(Token {
                text: input[start..].to_string(),
                start,
                end: input.len(),
                index: tokens.len(),
            });
        }

        tokens
    }

    /// Words of `input` as fed to the network.
    ///
    /// An input without any word yields a single empty word so that every
    /// sample contributes at least one position to max-pooling.
    pub fn words(&self, input: &str) -> Vec<String> {
        let words: Vec<String> = self.tokenize(input).into_iter().map(|t| t.text).collect();
        if words.is_empty() {
            vec![String::new()]
        } else {
            words
        }
    }
}
