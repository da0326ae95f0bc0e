use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use candle_core::Device;
use charlstm_core::{Averaging, CharLstmClassifier, ClassifierConfig, LabelSet, OptimizerKind};
use charlstm_trainer::data::{label_names, load_tsv, unzip};
use charlstm_trainer::{TrainConfig, Trainer};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "charlstm-train")]
#[command(about = "Train and apply a character-level BiLSTM text classifier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a classifier on a labelled TSV file
    Train {
        /// Training data (label<TAB>text per line)
        #[arg(long)]
        train: PathBuf,

        /// Validation data used for checkpoint selection
        #[arg(long)]
        dev: PathBuf,

        /// Where the best model is written
        #[arg(long, default_value = "models/charlstm")]
        model_dir: PathBuf,

        /// JSON file with a classifier config; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value_t = 30)]
        epochs: usize,

        #[arg(long, default_value_t = 8)]
        batch_size: usize,

        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// default, rmsprop, adam or adagrad
        #[arg(long)]
        optimizer: Option<String>,

        #[arg(long)]
        learning_rate: Option<f64>,

        #[arg(long)]
        lstm_dim: Option<usize>,

        #[arg(long)]
        embedding_size: Option<usize>,

        #[arg(long)]
        embedding_factor: Option<f64>,

        #[arg(long)]
        decay_rate: Option<f64>,

        #[arg(long)]
        dropout_keep: Option<f64>,

        #[arg(long, default_value = "./tmp")]
        checkpoint_dir: PathBuf,
    },
    /// Label lines read from stdin
    Predict {
        #[arg(long, default_value = "models/charlstm")]
        model_dir: PathBuf,

        #[arg(long, default_value_t = 100)]
        batch_size: usize,

        /// Print class probabilities as JSON instead of the best label
        #[arg(long)]
        proba: bool,
    },
    /// Score a saved model on a labelled TSV file
    Evaluate {
        #[arg(long, default_value = "models/charlstm")]
        model_dir: PathBuf,

        #[arg(long)]
        data: PathBuf,

        #[arg(long, default_value_t = 100)]
        batch_size: usize,

        /// Report macro-averaged F1 instead of accuracy
        #[arg(long = "macro")]
        macro_avg: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            train,
            dev,
            model_dir,
            config,
            epochs,
            batch_size,
            seed,
            optimizer,
            learning_rate,
            lstm_dim,
            embedding_size,
            embedding_factor,
            decay_rate,
            dropout_keep,
            checkpoint_dir,
        } => {
            let mut model_config = match config {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read config {}", path.display()))?;
                    serde_json::from_str::<ClassifierConfig>(&raw)?
                }
                None => ClassifierConfig::default(),
            };
            if let Some(name) = optimizer {
                model_config.optimizer = name.parse::<OptimizerKind>()?;
            }
            if learning_rate.is_some() {
                model_config.learning_rate = learning_rate;
            }
            if let Some(v) = lstm_dim {
                model_config.lstm_dim = v;
            }
            if let Some(v) = embedding_size {
                model_config.embedding_size = v;
            }
            if let Some(v) = embedding_factor {
                model_config.embedding_factor = v;
            }
            if let Some(v) = decay_rate {
                model_config.decay_rate = v;
            }
            if let Some(v) = dropout_keep {
                model_config.dropout_keep = v;
            }

            let train_set = load_tsv(&train)
                .with_context(|| format!("failed to load {}", train.display()))?;
            let dev_set =
                load_tsv(&dev).with_context(|| format!("failed to load {}", dev.display()))?;
            info!("Loaded {} training examples", train_set.len());

            let labels = LabelSet::new(label_names(train_set.iter().chain(&dev_set)))?;
            let classifier = CharLstmClassifier::new(labels, model_config, Device::Cpu)?;
            let mut trainer = Trainer::new(classifier)?;

            let (train_x, train_y) = unzip(&train_set);
            let (dev_x, dev_y) = unzip(&dev_set);
            let train_config = TrainConfig::new()
                .with_epochs(epochs)
                .with_batch_size(batch_size)
                .with_seed(seed)
                .with_checkpoint_dir(checkpoint_dir);

            let report = trainer.fit(&train_x, &train_y, &dev_x, &dev_y, &train_config)?;
            trainer.classifier().save(&model_dir)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Predict {
            model_dir,
            batch_size,
            proba,
        } => {
            let classifier = CharLstmClassifier::load(&model_dir, Device::Cpu)?;
            let lines: Vec<String> = io::stdin().lock().lines().collect::<io::Result<_>>()?;

            let stdout = io::stdout();
            let mut out = stdout.lock();
            if proba {
                let probs = classifier.predict_proba(&lines, batch_size)?;
                for (line, row) in lines.iter().zip(probs) {
                    let scores: serde_json::Map<String, serde_json::Value> = classifier
                        .labels()
                        .names()
                        .iter()
                        .cloned()
                        .zip(row.into_iter().map(serde_json::Value::from))
                        .collect();
                    let record = serde_json::json!({ "input": line, "scores": scores });
                    writeln!(out, "{}", record)?;
                }
            } else {
                let labels = classifier.predict(&lines, batch_size)?;
                for (line, label) in lines.iter().zip(labels) {
                    writeln!(out, "{}\t{}", label, line)?;
                }
            }
        }
        Commands::Evaluate {
            model_dir,
            data,
            batch_size,
            macro_avg,
        } => {
            let classifier = CharLstmClassifier::load(&model_dir, Device::Cpu)?;
            let examples =
                load_tsv(&data).with_context(|| format!("failed to load {}", data.display()))?;
            let (texts, labels) = unzip(&examples);

            let averaging = if macro_avg {
                Averaging::Macro
            } else {
                Averaging::Micro
            };
            let score = classifier.evaluate(&texts, &labels, batch_size, averaging)?;
            println!("{:?} score on {} examples: {:.4}", averaging, examples.len(), score);
        }
    }

    Ok(())
}
