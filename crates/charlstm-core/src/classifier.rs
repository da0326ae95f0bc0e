//! # Character LSTM Classifier
//!
//! Owns the network parameters, the label set and the device, and exposes
//! the inference paths (`predict`, `predict_proba`, `evaluate`) together
//! with the save / restore contract used for checkpointing.
//!
//! A saved model directory contains:
//! - `model.safetensors`: every network parameter, keyed by variable name
//! - `config.json`: the label set and the [`ClassifierConfig`]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ClassifierConfig;
use crate::error::{CharLstmError, Result};
use crate::feed::Feed;
use crate::labels::LabelSet;
use crate::metrics::{self, Averaging};
use crate::model::CharLstmNet;

/// Weights file name inside a saved model directory.
pub const WEIGHTS_FILE: &str = "model.safetensors";
/// Config file name inside a saved model directory.
pub const CONFIG_FILE: &str = "config.json";
/// Default inference batch size.
pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Serialize, Deserialize)]
struct SavedConfig {
    labels: LabelSet,
    config: ClassifierConfig,
}

/// Loss and predictions for one scored feed.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchScore {
    /// Mean cross-entropy over the batch.
    pub loss: f32,
    pub predicted: Vec<usize>,
    pub expected: Vec<usize>,
}

/// Character-level BiLSTM text classifier.
pub struct CharLstmClassifier {
    labels: LabelSet,
    config: ClassifierConfig,
    varmap: VarMap,
    net: CharLstmNet,
    device: Device,
}

impl CharLstmClassifier {
    /// Create a classifier with freshly initialised weights.
    pub fn new(labels: LabelSet, config: ClassifierConfig, device: Device) -> Result<Self> {
        config.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let net = CharLstmNet::new(&config, labels.len(), vb)?;

        info!(
            labels = labels.len(),
            embedding_size = config.embedding_size,
            lstm_dim = config.lstm_dim,
            "built character LSTM classifier"
        );

        Ok(Self {
            labels,
            config,
            varmap,
            net,
            device,
        })
    }

    /// Rebuild a classifier from a directory written by [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(dir: P, device: Device) -> Result<Self> {
        let dir = dir.as_ref();
        let raw = std::fs::read_to_string(dir.join(CONFIG_FILE)).map_err(|e| {
            CharLstmError::Checkpoint(format!("failed to read {}: {e}", dir.join(CONFIG_FILE).display()))
        })?;
        let saved: SavedConfig = serde_json::from_str(&raw)?;

        let mut classifier = Self::new(saved.labels, saved.config, device)?;
        classifier.restore(dir.join(WEIGHTS_FILE))?;
        Ok(classifier)
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Trainable parameters, keyed by variable name.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Encode a batch of strings for this classifier.
    pub fn feed<S: AsRef<str>>(&self, texts: &[S]) -> Result<Feed> {
        Feed::build(texts, self.config.char_buckets, &self.device)
    }

    /// Encode a labelled batch.
    pub fn labelled_feed<S: AsRef<str>, L: AsRef<str>>(&self, texts: &[S], labels: &[L]) -> Result<Feed> {
        check_lengths(texts.len(), labels.len())?;
        let targets = self.labels.indices(labels)?;
        self.feed(texts)?.with_targets(&targets)
    }

    /// Logits `[B, num_labels]`.
    pub fn logits(&self, feed: &Feed, train: bool) -> Result<Tensor> {
        Ok(self.net.forward(feed, train)?)
    }

    /// Mean softmax cross-entropy of a labelled feed.
    pub fn loss(&self, feed: &Feed, train: bool) -> Result<Tensor> {
        let targets = feed
            .targets
            .as_ref()
            .ok_or_else(|| CharLstmError::Consistency("feed has no targets".into()))?;
        let logits = self.logits(feed, train)?;
        Ok(candle_nn::loss::cross_entropy(&logits, targets)?)
    }

    /// Loss and argmax predictions of a labelled feed, without dropout.
    pub fn score_feed(&self, feed: &Feed) -> Result<BatchScore> {
        let targets = feed
            .targets
            .as_ref()
            .ok_or_else(|| CharLstmError::Consistency("feed has no targets".into()))?;
        let logits = self.logits(feed, false)?;
        let loss = candle_nn::loss::cross_entropy(&logits, targets)?.to_scalar::<f32>()?;
        let predicted = argmax(&logits)?;
        let expected = targets
            .to_vec1::<u32>()?
            .into_iter()
            .map(|t| t as usize)
            .collect();

        Ok(BatchScore {
            loss,
            predicted,
            expected,
        })
    }

    /// Predicted label index for every input.
    pub fn predict_indices<S: AsRef<str>>(&self, texts: &[S], batch_size: usize) -> Result<Vec<usize>> {
        let batch_size = check_batch_size(batch_size)?;
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            let feed = self.feed(chunk)?;
            out.extend(argmax(&self.logits(&feed, false)?)?);
        }
        Ok(out)
    }

    /// Predicted label name for every input.
    pub fn predict<S: AsRef<str>>(&self, texts: &[S], batch_size: usize) -> Result<Vec<String>> {
        self.predict_indices(texts, batch_size)?
            .into_iter()
            .map(|idx| {
                self.labels
                    .name(idx)
                    .map(str::to_string)
                    .ok_or_else(|| CharLstmError::Consistency(format!("label index {idx} out of range")))
            })
            .collect()
    }

    /// Class probabilities for every input; columns follow [`labels`](Self::labels).
    pub fn predict_proba<S: AsRef<str>>(&self, texts: &[S], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        let batch_size = check_batch_size(batch_size)?;
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            let feed = self.feed(chunk)?;
            let logits = self.logits(&feed, false)?;
            let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
            out.extend(probs.to_vec2::<f32>()?);
        }
        Ok(out)
    }

    /// Score predictions on `texts` against `labels`.
    pub fn evaluate<S: AsRef<str>, L: AsRef<str>>(
        &self,
        texts: &[S],
        labels: &[L],
        batch_size: usize,
        averaging: Averaging,
    ) -> Result<f64> {
        check_lengths(texts.len(), labels.len())?;
        let expected: Vec<usize> = self
            .labels
            .indices(labels)?
            .into_iter()
            .map(|i| i as usize)
            .collect();
        let predicted = self.predict_indices(texts, batch_size)?;

        let score = metrics::score(&predicted, &expected, self.labels.len(), averaging);
        debug!(samples = texts.len(), ?averaging, score, "evaluated");
        Ok(score)
    }

    /// Fraction of matching label indices.
    pub fn accuracy(&self, predicted: &[usize], expected: &[usize]) -> f64 {
        metrics::accuracy(predicted, expected)
    }

    /// Write weights and config into `dir`, creating it if needed.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        self.save_weights(dir.join(WEIGHTS_FILE))?;
        let saved = SavedConfig {
            labels: self.labels.clone(),
            config: self.config.clone(),
        };
        std::fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(&saved)?)?;

        info!("Model saved to {:?}", dir);
        Ok(())
    }

    /// Write only the weights to a safetensors file.
    pub fn save_weights<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.varmap
            .save(path)
            .map_err(|e| CharLstmError::Checkpoint(format!("failed to write {}: {e}", path.display())))
    }

    /// Replace the current weights with those stored at `path`.
    pub fn restore<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.check_checkpoint(path)?;
        self.varmap
            .load(path)
            .map_err(|e| CharLstmError::Checkpoint(format!("failed to load {}: {e}", path.display())))?;
        debug!("restored weights from {:?}", path);
        Ok(())
    }

    /// Verify that a weights file carries exactly this network's variables.
    fn check_checkpoint(&self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)
            .map_err(|e| CharLstmError::Checkpoint(format!("failed to read {}: {e}", path.display())))?;
        let tensors = safetensors::SafeTensors::deserialize(&bytes)
            .map_err(|e| CharLstmError::Checkpoint(format!("invalid safetensors {}: {e}", path.display())))?;

        let stored: BTreeSet<String> = tensors.names().into_iter().cloned().collect();
        let expected: BTreeMap<String, Vec<usize>> = self
            .varmap
            .data()
            .lock()
            .map_err(|_| CharLstmError::Consistency("variable map lock poisoned".into()))?
            .iter()
            .map(|(name, var)| (name.clone(), var.dims().to_vec()))
            .collect();
        let names: BTreeSet<String> = expected.keys().cloned().collect();

        if stored != names {
            let missing: Vec<_> = names.difference(&stored).cloned().collect();
            let extra: Vec<_> = stored.difference(&names).cloned().collect();
            return Err(CharLstmError::Checkpoint(format!(
                "{} does not match the network: missing {missing:?}, unexpected {extra:?}",
                path.display()
            )));
        }

        // every variable is checked before any is written
        for (name, dims) in &expected {
            let view = tensors
                .tensor(name)
                .map_err(|e| CharLstmError::Checkpoint(format!("{}: {name}: {e}", path.display())))?;
            if view.dtype() != safetensors::Dtype::F32 || view.shape() != dims.as_slice() {
                return Err(CharLstmError::Checkpoint(format!(
                    "{}: {name} is {:?} {:?}, network expects F32 {:?}",
                    path.display(),
                    view.dtype(),
                    view.shape(),
                    dims
                )));
            }
        }
        Ok(())
    }
}

fn argmax(logits: &Tensor) -> Result<Vec<usize>> {
    Ok(logits
        .argmax(D::Minus1)?
        .to_vec1::<u32>()?
        .into_iter()
        .map(|i| i as usize)
        .collect())
}

fn check_lengths(texts: usize, labels: usize) -> Result<()> {
    if texts != labels {
        return Err(CharLstmError::LengthMismatch { texts, labels });
    }
    Ok(())
}

fn check_batch_size(batch_size: usize) -> Result<usize> {
    if batch_size == 0 {
        return Err(CharLstmError::InvalidConfig("batch_size must be positive".into()));
    }
    Ok(batch_size)
}
