pub mod chars;
pub mod tokenizer;

pub use chars::{char_bucket, CharClass, CHAR_BUCKETS};
pub use tokenizer::{Token, Tokenizer};
