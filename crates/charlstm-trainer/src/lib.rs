//! # CharLSTM Trainer
//!
//! Optimizers, learning-rate schedule and the supervised training loop for
//! the character LSTM classifier, plus loading of `label<TAB>text` datasets.

pub mod data;
pub mod optim;
pub mod trainer;

pub use data::{load_tsv, Example};
pub use optim::{CharOptim, LearningRateSchedule, ParamsCharOptim};
pub use trainer::{EpochStats, FitReport, TrainConfig, Trainer};
