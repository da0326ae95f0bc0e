use candle_core::Device;
use charlstm_core::{
    Averaging, CharLstmClassifier, CharLstmError, ClassifierConfig, LabelSet, OptimizerKind,
};
use charlstm_trainer::{TrainConfig, Trainer};

fn dataset() -> (Vec<String>, Vec<String>) {
    let lower = ["apple pie", "quiet river", "small dog", "green tea", "soft rain", "old book"];
    let upper = ["APPLE PIE", "QUIET RIVER", "SMALL DOG", "GREEN TEA", "SOFT RAIN", "OLD BOOK"];

    let mut texts = Vec::new();
    let mut labels = Vec::new();
    for (l, u) in lower.iter().zip(upper.iter()) {
        texts.push(l.to_string());
        labels.push("lower".to_string());
        texts.push(u.to_string());
        labels.push("upper".to_string());
    }
    (texts, labels)
}

fn trainer(optimizer: OptimizerKind, decay: f64) -> Trainer {
    trainer_with_factor(optimizer, decay, 2.0)
}

fn trainer_with_factor(optimizer: OptimizerKind, decay: f64, factor: f64) -> Trainer {
    let labels = LabelSet::new(["lower", "upper"]).unwrap();
    let config = ClassifierConfig::new()
        .with_embedding_size(4)
        .with_lstm_dim(6)
        .with_optimizer(optimizer)
        .with_learning_rate(0.01)
        .with_decay_rate(decay)
        .with_embedding_factor(factor);
    let classifier = CharLstmClassifier::new(labels, config, Device::Cpu).unwrap();
    Trainer::new(classifier).unwrap()
}

#[test]
fn fit_selects_and_restores_best_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (texts, labels) = dataset();
    let (dev_x, dev_y) = (texts[..4].to_vec(), labels[..4].to_vec());

    let mut trainer = trainer(OptimizerKind::RmsProp, 1.0);
    let config = TrainConfig::new()
        .with_epochs(3)
        .with_batch_size(4)
        .with_checkpoint_dir(dir.path());

    let report = trainer.fit(&texts, &labels, &dev_x, &dev_y, &config).unwrap();

    assert_eq!(report.history.len(), 3);
    assert!(report.history[0].saved, "first epoch always checkpoints");
    let best_epoch = report.best_epoch.unwrap();
    let best = &report.history[best_epoch - 1];
    assert_eq!(best.val, report.best_score);
    assert!(report.history.iter().all(|h| h.val <= report.best_score));

    let checkpoint = report.best_checkpoint.unwrap();
    assert!(checkpoint.exists());
    let name = checkpoint.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("model-t"));
    assert!(name.ends_with(&format!("-charlstm-e{best_epoch}-s1.safetensors")));

    // the restored weights reproduce the selected validation score
    let score = trainer
        .classifier()
        .evaluate(&dev_x, &dev_y, 100, Averaging::Micro)
        .unwrap();
    assert_eq!(score, report.best_score);
}

fn weights(trainer: &Trainer, name: &str) -> Vec<f32> {
    let data = trainer.classifier().varmap().data().lock().unwrap();
    data[name].flatten_all().unwrap().to_vec1::<f32>().unwrap()
}

#[test]
fn zero_embedding_factor_freezes_char_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let (texts, labels) = dataset();

    let mut trainer = trainer_with_factor(OptimizerKind::RmsProp, 1.0, 0.0);
    let names = ["char_embedding.weight", "type_embedding.weight", "output.weight"];
    let before: Vec<Vec<f32>> = names.iter().map(|n| weights(&trainer, n)).collect();

    let config = TrainConfig::new()
        .with_epochs(1)
        .with_batch_size(4)
        .with_checkpoint_dir(dir.path());
    trainer.fit(&texts, &labels, &texts, &labels, &config).unwrap();

    let after: Vec<Vec<f32>> = names.iter().map(|n| weights(&trainer, n)).collect();
    assert_eq!(before[0], after[0], "char embedding must not move");
    assert_ne!(before[1], after[1]);
    assert_ne!(before[2], after[2]);
}

#[test]
fn fit_keeps_at_most_max_to_keep_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let (texts, labels) = dataset();
    // empty validation set: every epoch ties at 0.0 and is saved
    let empty: Vec<String> = Vec::new();

    let mut trainer = trainer(OptimizerKind::Adam, 1.0);
    let config = TrainConfig::new()
        .with_epochs(4)
        .with_batch_size(6)
        .with_max_to_keep(2)
        .with_checkpoint_dir(dir.path());

    let report = trainer.fit(&texts, &labels, &empty, &empty, &config).unwrap();

    assert_eq!(report.best_epoch, Some(4));
    assert!(report.history.iter().all(|h| h.saved));
    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 2);
}

#[test]
fn learning_rate_decays_per_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let (texts, labels) = dataset();

    let mut trainer = trainer(OptimizerKind::Adagrad, 0.5);
    assert_eq!(trainer.learning_rate(), 0.01);

    let config = TrainConfig::new()
        .with_epochs(2)
        .with_batch_size(12)
        .with_checkpoint_dir(dir.path());
    let report = trainer.fit(&texts, &labels, &texts, &labels, &config).unwrap();

    assert_eq!(report.history[0].learning_rate, 0.005);
    assert_eq!(report.history[1].learning_rate, 0.0025);
}

#[test]
fn zero_epochs_is_no_fit() {
    let dir = tempfile::tempdir().unwrap();
    let (texts, labels) = dataset();

    let mut trainer = trainer(OptimizerKind::RmsProp, 1.0);
    let config = TrainConfig::new()
        .with_epochs(0)
        .with_checkpoint_dir(dir.path());
    let report = trainer.fit(&texts, &labels, &texts, &labels, &config).unwrap();

    assert_eq!(report.best_epoch, None);
    assert!(report.best_checkpoint.is_none());
    assert!(report.history.is_empty());
}

#[test]
fn fit_rejects_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    let (texts, labels) = dataset();
    let config = TrainConfig::new()
        .with_epochs(1)
        .with_checkpoint_dir(dir.path());
    let mut trainer = trainer(OptimizerKind::RmsProp, 1.0);

    let empty: Vec<String> = Vec::new();
    assert!(matches!(
        trainer.fit(&empty, &empty, &texts, &labels, &config),
        Err(CharLstmError::EmptyDataset)
    ));

    let bad_dev = vec!["Mixed".to_string()];
    let bad_labels = vec!["mixed".to_string()];
    assert!(matches!(
        trainer.fit(&texts, &labels, &bad_dev, &bad_labels, &config),
        Err(CharLstmError::UnknownLabel(_))
    ));

    assert!(matches!(
        trainer.fit(&texts, &labels[..3], &texts, &labels, &config),
        Err(CharLstmError::LengthMismatch { .. })
    ));
}
