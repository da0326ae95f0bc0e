//! Supervised training loop with best-checkpoint selection.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use candle_nn::Optimizer;
use charlstm_core::{
    BatchScore, CharLstmClassifier, CharLstmError, CharLstmNet, Feed, Result, DEFAULT_BATCH_SIZE,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::optim::{CharOptim, LearningRateSchedule, ParamsCharOptim};

/// Settings of one `fit` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub num_epoch: usize,
    pub batch_size: usize,
    pub seed: u64,
    /// Size of the fixed training subset scored after every epoch.
    pub train_sample_size: usize,
    /// Batch size used when scoring the training subset and validation set.
    pub eval_batch_size: usize,
    pub checkpoint_dir: PathBuf,
    /// Number of checkpoints kept on disk; older ones are deleted.
    pub max_to_keep: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            num_epoch: 30,
            batch_size: 8,
            seed: 1,
            train_sample_size: 1000,
            eval_batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_dir: PathBuf::from("./tmp"),
            max_to_keep: 100,
        }
    }
}

impl TrainConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_epochs(mut self, num_epoch: usize) -> Self {
        self.num_epoch = num_epoch;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_checkpoint_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.eval_batch_size == 0 {
            return Err(CharLstmError::InvalidConfig("batch sizes must be positive".into()));
        }
        if self.max_to_keep == 0 {
            return Err(CharLstmError::InvalidConfig("max_to_keep must be positive".into()));
        }
        Ok(())
    }
}

/// Scores recorded after one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    /// Loss on the training subset (no dropout).
    pub loss: f32,
    /// Accuracy on the training subset.
    pub fit: f64,
    /// Accuracy on the validation set.
    pub val: f64,
    pub learning_rate: f64,
    /// Whether this epoch produced a new best checkpoint.
    pub saved: bool,
}

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    /// Epoch whose weights were restored; `None` if no epoch ran.
    pub best_epoch: Option<usize>,
    pub best_score: f64,
    pub best_checkpoint: Option<PathBuf>,
    pub history: Vec<EpochStats>,
}

/// Drives training of a [`CharLstmClassifier`].
pub struct Trainer {
    classifier: CharLstmClassifier,
    optimizer: CharOptim,
    schedule: LearningRateSchedule,
    epochs_done: usize,
}

impl Trainer {
    /// Set up the optimizer configured on `classifier`.
    pub fn new(classifier: CharLstmClassifier) -> Result<Self> {
        let config = classifier.config().clone();
        let schedule =
            LearningRateSchedule::new(config.effective_learning_rate(), config.decay_rate);

        let embedding_name = format!("{}.weight", CharLstmNet::CHAR_EMBEDDING);
        let (vars, embedding) = {
            let data = classifier
                .varmap()
                .data()
                .lock()
                .map_err(|_| CharLstmError::Consistency("variable map lock poisoned".into()))?;
            let vars: Vec<_> = data.values().cloned().collect();
            (vars, data.get(&embedding_name).cloned())
        };
        let embedding = embedding.ok_or_else(|| {
            CharLstmError::Consistency(format!("no trainable variable named {embedding_name}"))
        })?;

        let params = ParamsCharOptim::new(config.optimizer, schedule.rate(0))
            .with_grad_scale(&embedding, config.embedding_factor);
        let optimizer = CharOptim::new(vars, params)?;

        info!(
            "Optimizer: {}, Learning rate: {}, Decay rate: {}",
            config.optimizer, schedule.base, schedule.decay
        );

        Ok(Self {
            classifier,
            optimizer,
            schedule,
            epochs_done: 0,
        })
    }

    pub fn classifier(&self) -> &CharLstmClassifier {
        &self.classifier
    }

    pub fn into_classifier(self) -> CharLstmClassifier {
        self.classifier
    }

    /// Current learning rate of the optimizer.
    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    /// Train on `(train_x, train_y)`, selecting the epoch with the best
    /// validation accuracy on `(dev_x, dev_y)`.
    ///
    /// Ties go to the later epoch. The best checkpoint is restored into the
    /// classifier before returning.
    pub fn fit<S, L>(
        &mut self,
        train_x: &[S],
        train_y: &[L],
        dev_x: &[S],
        dev_y: &[L],
        config: &TrainConfig,
    ) -> Result<FitReport>
    where
        S: AsRef<str>,
        L: AsRef<str>,
    {
        config.validate()?;
        check_lengths(train_x.len(), train_y.len())?;
        check_lengths(dev_x.len(), dev_y.len())?;
        if train_x.is_empty() {
            return Err(CharLstmError::EmptyDataset);
        }

        let labels = self.classifier.labels();
        let train_targets = labels.indices(train_y)?;
        let dev_targets = labels.indices(dev_y)?;

        let mut rng = oorandom::Rand64::new(u128::from(config.seed));
        info!("Target labels: {}", labels.len());
        info!(
            "{}/{} in training/validation set",
            train_x.len(),
            dev_x.len()
        );

        let session_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        std::fs::create_dir_all(&config.checkpoint_dir)?;

        let mut sample = permutation(train_x.len(), &mut rng);
        sample.truncate(config.train_sample_size.min(train_x.len()));
        let train_feeds = self.build_feeds(train_x, &train_targets, &sample, config.eval_batch_size)?;
        let dev_order: Vec<usize> = (0..dev_x.len()).collect();
        let dev_feeds = self.build_feeds(dev_x, &dev_targets, &dev_order, config.eval_batch_size)?;

        let mut best: Option<(usize, PathBuf)> = None;
        let mut best_score = 0.0;
        let mut kept: VecDeque<PathBuf> = VecDeque::new();
        let mut history = Vec::with_capacity(config.num_epoch);

        for epoch in 1..=config.num_epoch {
            let started = Instant::now();

            let order = permutation(train_x.len(), &mut rng);
            self.train_minibatches(train_x, &train_targets, &order, config.batch_size)?;
            self.advance_schedule();

            let fit = score_feeds(&self.classifier, &train_feeds)?;
            let val = score_feeds(&self.classifier, &dev_feeds)?;
            let fit_acc = charlstm_core::metrics::accuracy(&fit.predicted, &fit.expected);
            let val_acc = charlstm_core::metrics::accuracy(&val.predicted, &val.expected);

            let mut save_marker = "";
            if val_acc >= best_score {
                let path = config.checkpoint_dir.join(format!(
                    "model-t{}-charlstm-e{}-s{}.safetensors",
                    session_id, epoch, config.seed
                ));
                self.classifier.save_weights(&path)?;
                remember_checkpoint(&mut kept, path.clone(), config.max_to_keep);

                best = Some((epoch, path));
                best_score = val_acc;
                save_marker = "*";
            }

            let elapsed = started.elapsed().as_secs();
            info!(
                "epoch {} loss {} fit {:.2} val {:.2} [{}m{}s] {}",
                epoch,
                fit.loss,
                fit_acc,
                val_acc,
                elapsed / 60,
                elapsed % 60,
                save_marker
            );

            history.push(EpochStats {
                epoch,
                loss: fit.loss,
                fit: fit_acc,
                val: val_acc,
                learning_rate: self.learning_rate(),
                saved: !save_marker.is_empty(),
            });
        }

        let report = match best {
            Some((epoch, path)) => {
                self.classifier.restore(&path)?;
                info!(
                    "Fitted to model from epoch {} with score {} at {}",
                    epoch,
                    best_score,
                    path.display()
                );
                FitReport {
                    best_epoch: Some(epoch),
                    best_score,
                    best_checkpoint: Some(path),
                    history,
                }
            }
            None => {
                warn!("no good fit");
                FitReport {
                    best_epoch: None,
                    best_score,
                    best_checkpoint: None,
                    history,
                }
            }
        };

        Ok(report)
    }

    /// One pass over `order` in minibatches, with dropout.
    fn train_minibatches<S: AsRef<str>>(
        &mut self,
        texts: &[S],
        targets: &[u32],
        order: &[usize],
        batch_size: usize,
    ) -> Result<()> {
        let total = order.len().div_ceil(batch_size);
        let mut mavg_loss: Option<f32> = None;

        for (k, chunk) in order.chunks(batch_size).enumerate() {
            let feed = gather_feed(&self.classifier, texts, targets, chunk)?;
            let loss = self.classifier.loss(&feed, true)?;
            self.optimizer.backward_step(&loss)?;

            let loss = loss.to_scalar::<f32>()?;
            let avg = match mavg_loss {
                None => loss,
                Some(prev) => 0.9 * prev + 0.1 * loss,
            };
            mavg_loss = Some(avg);
            debug!("training {}/{} loss={:.7}", k + 1, total, avg);
        }
        Ok(())
    }

    fn advance_schedule(&mut self) {
        self.epochs_done += 1;
        self.optimizer
            .set_learning_rate(self.schedule.rate(self.epochs_done));
    }

    fn build_feeds<S: AsRef<str>>(
        &self,
        texts: &[S],
        targets: &[u32],
        order: &[usize],
        batch_size: usize,
    ) -> Result<Vec<Feed>> {
        order
            .chunks(batch_size)
            .map(|chunk| gather_feed(&self.classifier, texts, targets, chunk))
            .collect()
    }
}

fn gather_feed<S: AsRef<str>>(
    classifier: &CharLstmClassifier,
    texts: &[S],
    targets: &[u32],
    indices: &[usize],
) -> Result<Feed> {
    let batch: Vec<&str> = indices.iter().map(|&i| texts[i].as_ref()).collect();
    let batch_targets: Vec<u32> = indices.iter().map(|&i| targets[i]).collect();
    classifier.feed(&batch)?.with_targets(&batch_targets)
}

/// Loss (size-weighted mean) and predictions over several feeds.
fn score_feeds(classifier: &CharLstmClassifier, feeds: &[Feed]) -> Result<BatchScore> {
    let mut total = BatchScore {
        loss: 0.0,
        predicted: Vec::new(),
        expected: Vec::new(),
    };
    let mut weighted = 0.0f64;

    for feed in feeds {
        let score = classifier.score_feed(feed)?;
        weighted += f64::from(score.loss) * feed.batch_size() as f64;
        total.predicted.extend(score.predicted);
        total.expected.extend(score.expected);
    }

    if !total.expected.is_empty() {
        total.loss = (weighted / total.expected.len() as f64) as f32;
    }
    Ok(total)
}

/// Track a new checkpoint, deleting the oldest beyond `max_to_keep`.
fn remember_checkpoint(kept: &mut VecDeque<PathBuf>, path: PathBuf, max_to_keep: usize) {
    kept.push_back(path);
    while kept.len() > max_to_keep {
        if let Some(old) = kept.pop_front() {
            remove_checkpoint(&old);
        }
    }
}

fn remove_checkpoint(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("failed to remove old checkpoint {}: {}", path.display(), e);
    }
}

/// Random permutation of `0..n` (Fisher-Yates).
fn permutation(n: usize, rng: &mut oorandom::Rand64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    for i in (1..n).rev() {
        let j = rng.rand_range(0..(i as u64 + 1)) as usize;
        indices.swap(i, j);
    }
    indices
}

fn check_lengths(texts: usize, labels: usize) -> Result<()> {
    if texts != labels {
        return Err(CharLstmError::LengthMismatch { texts, labels });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_is_seeded() {
        let a = permutation(20, &mut oorandom::Rand64::new(7));
        let b = permutation(20, &mut oorandom::Rand64::new(7));
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_permutation_small() {
        let mut rng = oorandom::Rand64::new(1);
        assert!(permutation(0, &mut rng).is_empty());
        assert_eq!(permutation(1, &mut rng), vec![0]);
    }

    #[test]
    fn test_remember_checkpoint_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut kept = VecDeque::new();
        let paths: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("c{i}"))).collect();
        for p in &paths {
            std::fs::write(p, b"x").unwrap();
            remember_checkpoint(&mut kept, p.clone(), 2);
        }

        assert!(!paths[0].exists());
        assert!(paths[1].exists());
        assert!(paths[2].exists());
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_train_config_validation() {
        assert!(TrainConfig::default().validate().is_ok());
        assert!(TrainConfig::new().with_batch_size(0).validate().is_err());
        assert!(TrainConfig::new().with_max_to_keep(0).validate().is_err());
    }

    #[test]
    fn test_train_config_defaults() {
        let config = TrainConfig::default();
        assert_eq!(config.num_epoch, 30);
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.seed, 1);
        assert_eq!(config.train_sample_size, 1000);
        assert_eq!(config.checkpoint_dir, PathBuf::from("./tmp"));
    }
}
