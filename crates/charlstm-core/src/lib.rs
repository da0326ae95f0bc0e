//! # CharLSTM Core
//!
//! Character-level recurrent text classifier built on candle. Each word is
//! read character by character (character embedding plus a character-class
//! embedding) by an LSTM; the resulting word vectors are read in both
//! directions by a word-level LSTM pair, max-pooled and classified by a
//! linear layer.
//!
//! ## Quick Start
//!
//! ```rust
//! use candle_core::Device;
//! use charlstm_core::{Averaging, CharLstmClassifier, ClassifierConfig, LabelSet};
//!
//! let labels = LabelSet::new(["ham", "spam"]).unwrap();
//! let config = ClassifierConfig::new().with_embedding_size(8).with_lstm_dim(16);
//! let clf = CharLstmClassifier::new(labels, config, Device::Cpu).unwrap();
//!
//! let probs = clf.predict_proba(&["WIN A FREE PRIZE!!!"], 100).unwrap();
//! assert_eq!(probs[0].len(), 2);
//! ```
pub mod classifier;
pub mod config;
pub mod error;
pub mod feed;
pub mod labels;
pub mod metrics;
pub mod model;
pub mod text;

// Re-export primary API
pub use classifier::{BatchScore, CharLstmClassifier, CONFIG_FILE, DEFAULT_BATCH_SIZE, WEIGHTS_FILE};
pub use config::{ClassifierConfig, OptimizerKind};
pub use error::{CharLstmError, Result};
pub use feed::Feed;
pub use labels::LabelSet;
pub use metrics::Averaging;
pub use model::CharLstmNet;
pub use text::{CharClass, Token, Tokenizer};
