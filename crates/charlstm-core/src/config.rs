//! Model and optimizer hyper-parameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CharLstmError, Result};
use crate::text::{CharClass, CHAR_BUCKETS};

/// Gradient-descent variant used for training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    #[default]
    #[serde(alias = "default")]
    RmsProp,
    Adam,
    Adagrad,
}

impl OptimizerKind {
    /// Learning rate used when none is configured.
    pub fn default_learning_rate(self) -> f64 {
        match self {
            OptimizerKind::Adam | OptimizerKind::RmsProp => 0.001,
            OptimizerKind::Adagrad => 0.5,
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = CharLstmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" | "rmsprop" => Ok(OptimizerKind::RmsProp),
            "adam" => Ok(OptimizerKind::Adam),
            "adagrad" => Ok(OptimizerKind::Adagrad),
            other => Err(CharLstmError::InvalidConfig(format!(
                "the optimizer {other} is not in list of available optimizers: default, adam, adagrad, rmsprop"
            ))),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizerKind::RmsProp => "rmsprop",
            OptimizerKind::Adam => "adam",
            OptimizerKind::Adagrad => "adagrad",
        };
        f.write_str(name)
    }
}

/// Hyper-parameters of the network and its optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Width of the character embedding.
    pub embedding_size: usize,
    /// Width of the character-class embedding.
    pub type_embedding_size: usize,
    /// Hidden size of every LSTM (char and word level).
    pub lstm_dim: usize,
    /// Rows of the character embedding; code points are taken modulo this.
    pub char_buckets: usize,
    pub optimizer: OptimizerKind,
    /// `None` selects the optimizer's default.
    pub learning_rate: Option<f64>,
    /// Gradient multiplier applied to the character embedding.
    pub embedding_factor: f64,
    /// Per-epoch exponential learning-rate decay.
    pub decay_rate: f64,
    /// Keep probability of the dropout in front of the output layer.
    pub dropout_keep: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            embedding_size: 32,
            type_embedding_size: 8,
            lstm_dim: 200,
            char_buckets: CHAR_BUCKETS,
            optimizer: OptimizerKind::RmsProp,
            learning_rate: None,
            embedding_factor: 1.0,
            decay_rate: 1.0,
            dropout_keep: 0.5,
        }
    }
}

impl ClassifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedding_size(mut self, size: usize) -> Self {
        self.embedding_size = size;
        self
    }

    pub fn with_lstm_dim(mut self, dim: usize) -> Self {
        self.lstm_dim = dim;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = Some(lr);
        self
    }

    pub fn with_embedding_factor(mut self, factor: f64) -> Self {
        self.embedding_factor = factor;
        self
    }

    pub fn with_decay_rate(mut self, decay: f64) -> Self {
        self.decay_rate = decay;
        self
    }

    pub fn with_dropout_keep(mut self, keep: f64) -> Self {
        self.dropout_keep = keep;
        self
    }

    /// Learning rate after resolving the optimizer default.
    pub fn effective_learning_rate(&self) -> f64 {
        self.learning_rate
            .unwrap_or_else(|| self.optimizer.default_learning_rate())
    }

    /// Input width of the character LSTM.
    pub fn char_input_size(&self) -> usize {
        self.embedding_size + self.type_embedding_size
    }

    /// Number of rows in the character-class embedding.
    pub fn type_buckets(&self) -> usize {
        CharClass::NUM_CLASSES
    }

    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("embedding_size", self.embedding_size),
            ("type_embedding_size", self.type_embedding_size),
            ("lstm_dim", self.lstm_dim),
            ("char_buckets", self.char_buckets),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(CharLstmError::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if !(self.dropout_keep > 0.0 && self.dropout_keep <= 1.0) {
            return Err(CharLstmError::InvalidConfig(format!(
                "dropout_keep must be in (0, 1], got {}",
                self.dropout_keep
            )));
        }
        if self.effective_learning_rate() <= 0.0 {
            return Err(CharLstmError::InvalidConfig(
                "learning_rate must be positive".into(),
            ));
        }
        if self.decay_rate <= 0.0 {
            return Err(CharLstmError::InvalidConfig("decay_rate must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClassifierConfig::default();
        assert_eq!(config.embedding_size, 32);
        assert_eq!(config.lstm_dim, 200);
        assert_eq!(config.char_buckets, 128);
        assert_eq!(config.optimizer, OptimizerKind::RmsProp);
        assert_eq!(config.effective_learning_rate(), 0.001);
        assert_eq!(config.char_input_size(), 40);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_optimizer_default_rates() {
        let adagrad = ClassifierConfig::new().with_optimizer(OptimizerKind::Adagrad);
        assert_eq!(adagrad.effective_learning_rate(), 0.5);

        let adam = ClassifierConfig::new()
            .with_optimizer(OptimizerKind::Adam)
            .with_learning_rate(0.01);
        assert_eq!(adam.effective_learning_rate(), 0.01);
    }

    #[test]
    fn test_optimizer_parse() {
        assert_eq!("default".parse::<OptimizerKind>().unwrap(), OptimizerKind::RmsProp);
        assert_eq!("Adam".parse::<OptimizerKind>().unwrap(), OptimizerKind::Adam);
        assert!("sgd".parse::<OptimizerKind>().is_err());
        assert_eq!(OptimizerKind::Adagrad.to_string(), "adagrad");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClassifierConfig::new().with_dropout_keep(0.0).validate().is_err());
        assert!(ClassifierConfig::new().with_dropout_keep(1.5).validate().is_err());
        assert!(ClassifierConfig::new().with_lstm_dim(0).validate().is_err());
        assert!(ClassifierConfig::new().with_learning_rate(-1.0).validate().is_err());
        assert!(ClassifierConfig::new().with_dropout_keep(1.0).validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClassifierConfig =
            serde_json::from_str(r#"{"lstm_dim": 16, "optimizer": "adam"}"#).unwrap();
        assert_eq!(config.lstm_dim, 16);
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert_eq!(config.embedding_size, 32);
    }

    #[test]
    fn test_json_accepts_default_optimizer() {
        let config: ClassifierConfig =
            serde_json::from_str(r#"{"optimizer": "default"}"#).unwrap();
        assert_eq!(config.optimizer, OptimizerKind::RmsProp);
        assert!(serde_json::from_str::<ClassifierConfig>(r#"{"optimizer": "sgd"}"#).is_err());
    }
}
