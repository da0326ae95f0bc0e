//! # Minibatch Feeds
//!
//! Turns a batch of variable-length strings into padded, masked tensors the
//! network can run over in one pass. All words of the batch are flattened
//! into a single `[W, Lc]` character grid so the character LSTM processes
//! every word in parallel; `word_index` then gathers the resulting word
//! vectors back into `[B, Lw]` sentence order.

use candle_core::{Device, Tensor};

use crate::error::{CharLstmError, Result};
use crate::text::{char_bucket, CharClass, Tokenizer};

/// Padded tensors for one minibatch.
#[derive(Debug, Clone)]
pub struct Feed {
    /// `[W, Lc]` u32 character buckets.
    pub char_ids: Tensor,
    /// `[W, Lc]` u32 character classes.
    pub type_ids: Tensor,
    /// `[W, Lc]` f32, 1.0 on real characters.
    pub char_mask: Tensor,
    /// `[B, Lw]` u32 rows into the flattened word list.
    pub word_index: Tensor,
    /// `[B, Lw]` f32, 1.0 on real words.
    pub word_mask: Tensor,
    /// `[B]` u32 target label indices, when known.
    pub targets: Option<Tensor>,
    batch_size: usize,
    num_words: usize,
    max_chars: usize,
    max_words: usize,
}

/// Host-side encoding of a batch before it is moved onto a device.
#[derive(Debug, Clone, Default, PartialEq)]
struct EncodedBatch {
    char_ids: Vec<u32>,
    type_ids: Vec<u32>,
    char_mask: Vec<f32>,
    word_index: Vec<u32>,
    word_mask: Vec<f32>,
    num_words: usize,
    max_chars: usize,
    max_words: usize,
}

fn encode_batch<S: AsRef<str>>(texts: &[S], char_buckets: usize) -> EncodedBatch {
    let tokenizer = Tokenizer::new();
    let sentences: Vec<Vec<Vec<char>>> = texts
        .iter()
        .map(|t| {
            tokenizer
                .words(t.as_ref())
                .iter()
                .map(|w| w.chars().collect())
                .collect()
        })
        .collect();

    let num_words: usize = sentences.iter().map(Vec::len).sum();
    let max_words = sentences.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let max_chars = sentences
        .iter()
        .flatten()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(1);

    let mut enc = EncodedBatch {
        char_ids: vec![0; num_words * max_chars],
        type_ids: vec![0; num_words * max_chars],
        char_mask: vec![0.0; num_words * max_chars],
        word_index: vec![0; sentences.len() * max_words],
        word_mask: vec![0.0; sentences.len() * max_words],
        num_words,
        max_chars,
        max_words,
    };

    let mut word_row = 0usize;
    for (b, sentence) in sentences.iter().enumerate() {
        for (w, chars) in sentence.iter().enumerate() {
            for (t, &c) in chars.iter().enumerate() {
                let at = word_row * max_chars + t;
                enc.char_ids[at] = char_bucket(c, char_buckets);
                enc.type_ids[at] = CharClass::of(c).index();
                enc.char_mask[at] = 1.0;
            }
            enc.word_index[b * max_words + w] = word_row as u32;
            enc.word_mask[b * max_words + w] = 1.0;
            word_row += 1;
        }
    }

    enc
}

impl Feed {
    /// Encode `texts` into a feed on `device`.
    pub fn build<S: AsRef<str>>(texts: &[S], char_buckets: usize, device: &Device) -> Result<Self> {
        if texts.is_empty() {
            return Err(CharLstmError::EmptyBatch);
        }
        if char_buckets == 0 {
            return Err(CharLstmError::InvalidConfig("char_buckets must be positive".into()));
        }
        let enc = encode_batch(texts, char_buckets);
        let b = texts.len();

        let char_shape = (enc.num_words, enc.max_chars);
        let word_shape = (b, enc.max_words);

        Ok(Self {
            char_ids: Tensor::from_vec(enc.char_ids, char_shape, device)?,
            type_ids: Tensor::from_vec(enc.type_ids, char_shape, device)?,
            char_mask: Tensor::from_vec(enc.char_mask, char_shape, device)?,
            word_index: Tensor::from_vec(enc.word_index, word_shape, device)?,
            word_mask: Tensor::from_vec(enc.word_mask, word_shape, device)?,
            targets: None,
            batch_size: b,
            num_words: enc.num_words,
            max_chars: enc.max_chars,
            max_words: enc.max_words,
        })
    }

    /// Attach target label indices, one per sample.
    pub fn with_targets(mut self, targets: &[u32]) -> Result<Self> {
        if targets.len() != self.batch_size {
            return Err(CharLstmError::LengthMismatch {
                texts: self.batch_size,
                labels: targets.len(),
            });
        }
        let device = self.char_ids.device().clone();
        self.targets = Some(Tensor::new(targets, &device)?);
        Ok(self)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Total number of words across the batch.
    pub fn num_words(&self) -> usize {
        self.num_words
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn max_words(&self) -> usize {
        self.max_words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let enc = encode_batch(&["ab C", "x"], 128);

        assert_eq!(enc.num_words, 3);
        assert_eq!(enc.max_chars, 2);
        assert_eq!(enc.max_words, 2);

        // words: "ab", "C", "x"
        assert_eq!(enc.char_ids, vec![97, 98, 67, 0, 120, 0]);
        assert_eq!(enc.type_ids, vec![0, 0, 1, 0, 0, 0]);
        assert_eq!(enc.char_mask, vec![1.0, 1.0, 1.0, 0.0, 1.0, 0.0]);
        assert_eq!(enc.word_index, vec![0, 1, 2, 0]);
        assert_eq!(enc.word_mask, vec![1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_encode_blank_text_is_one_empty_word() {
        let enc = encode_batch(&["", "hi"], 128);

        assert_eq!(enc.num_words, 2);
        assert_eq!(enc.word_mask, vec![1.0, 1.0]);
        // the empty word has no real characters
        assert_eq!(enc.char_mask, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_build_shapes() {
        let feed = Feed::build(&["hello world", "a"], 128, &Device::Cpu).unwrap();
        assert_eq!(feed.batch_size(), 2);
        assert_eq!(feed.char_ids.dims(), &[3, 5]);
        assert_eq!(feed.word_index.dims(), &[2, 2]);
        assert!(feed.targets.is_none());

        let feed = feed.with_targets(&[1, 0]).unwrap();
        assert_eq!(feed.targets.unwrap().to_vec1::<u32>().unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let texts: Vec<String> = Vec::new();
        assert!(matches!(
            Feed::build(&texts, 128, &Device::Cpu),
            Err(CharLstmError::EmptyBatch)
        ));
    }

    #[test]
    fn test_zero_buckets_rejected() {
        assert!(matches!(
            Feed::build(&["abc"], 0, &Device::Cpu),
            Err(CharLstmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_target_length_checked() {
        let feed = Feed::build(&["a", "b"], 128, &Device::Cpu).unwrap();
        assert!(feed.with_targets(&[0]).is_err());
    }
}
