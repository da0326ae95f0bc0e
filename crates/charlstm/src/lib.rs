//! # CharLSTM
//!
//! Character-level BiLSTM text classifier. Re-exports the model and
//! inference API of [`charlstm_core`] and the training loop of
//! [`charlstm_trainer`].

pub use charlstm_core::*;
pub use charlstm_trainer::{
    data, load_tsv, EpochStats, Example, FitReport, LearningRateSchedule, TrainConfig, Trainer,
};
