//! Segmental CRF training
//!
//! Reads a frame batch and a matching segment batch, trains for the
//! configured number of epochs, and writes the final parameters and
//! optimizer state.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use scrf_core::LossKind;
use scrf_trainer::{
    OptimizerKind, ParamSet, TrainConfig, Trainer, load_arpa_bigram, load_examples, load_labels,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scrf-learn")]
#[command(about = "Train a segmental CRF on segmented frame data")]
#[command(version)]
struct Cli {
    /// Frame batch: per utterance a name line, frame rows, then `.`
    #[arg(long)]
    frames: PathBuf,

    /// Segment batch: per utterance a name line, `start end label` rows, then `.`
    #[arg(long)]
    segments: PathBuf,

    /// Label list, one per line
    #[arg(long)]
    labels: PathBuf,

    /// ARPA bigram language model; without one every label may follow any other
    #[arg(long)]
    lm: Option<PathBuf>,

    /// JSON training config; the flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Parameters to start from
    #[arg(long)]
    param: Option<PathBuf>,

    /// Optimizer state to resume
    #[arg(long)]
    opt_data: Option<PathBuf>,

    /// Comma-separated feature names
    #[arg(long)]
    features: Option<String>,

    /// hinge, log or filtering
    #[arg(long)]
    loss: Option<LossKind>,

    /// sgd, adagrad or momentum
    #[arg(long)]
    optimizer: Option<OptimizerKind>,

    #[arg(long)]
    step_size: Option<f64>,

    /// Filtering loss interpolation between max and mean max-marginal
    #[arg(long)]
    alpha: Option<f64>,

    /// Weight of the overlap cost in cost-augmented losses
    #[arg(long)]
    cost_scale: Option<f64>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Checkpoint every this many examples
    #[arg(long)]
    save_every: Option<usize>,

    #[arg(long)]
    min_seg: Option<usize>,

    #[arg(long)]
    max_seg: Option<usize>,

    /// Divide reference segment times by this factor
    #[arg(long)]
    subsample: Option<usize>,

    #[arg(long, default_value = "param-last.json")]
    output_param: PathBuf,

    #[arg(long, default_value = "opt-data-last.json")]
    output_opt_data: PathBuf,
}

impl Cli {
    fn train_config(&self) -> Result<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::load(path)?,
            None => TrainConfig::default(),
        };

        if let Some(features) = &self.features {
            config.features = features.clone();
        }
        if let Some(kind) = self.loss {
            config.loss.kind = kind;
        }
        if let Some(optimizer) = self.optimizer {
            config.optimizer = optimizer;
        }
        if let Some(step_size) = self.step_size {
            config.step_size = step_size;
        }
        if let Some(alpha) = self.alpha {
            config.loss.alpha = alpha;
        }
        if let Some(cost_scale) = self.cost_scale {
            config.loss.cost_scale = cost_scale;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.save_every.is_some() {
            config.save_every = self.save_every;
        }
        if let Some(min_seg) = self.min_seg {
            config.segmentation.min_seg = min_seg;
        }
        if let Some(max_seg) = self.max_seg {
            config.segmentation.max_seg = max_seg;
        }
        if let Some(subsample) = self.subsample {
            config.subsample = subsample;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.train_config()?;

    let labels = load_labels(&cli.labels)?;
    let lm = cli.lm.as_ref().map(load_arpa_bigram).transpose()?;
    let examples = load_examples(&cli.frames, &cli.segments, config.subsample)
        .with_context(|| format!("loading {}", cli.frames.display()))?;
    let Some(first) = examples.first() else {
        bail!("no utterances in {}", cli.frames.display());
    };
    let frame_dim = first.frames.ncols();
    info!(
        examples = examples.len(),
        frame_dim,
        labels = labels.len(),
        lm = lm.is_some(),
        "data loaded"
    );

    let mut trainer = Trainer::new(config, labels, lm, frame_dim)?
        .with_checkpoint(&cli.output_param, &cli.output_opt_data);
    if let Some(path) = &cli.param {
        trainer = trainer.with_params(ParamSet::load(path)?)?;
    }
    if let Some(path) = &cli.opt_data {
        trainer = trainer.with_optimizer_state(ParamSet::load(path)?);
    }

    let summaries = trainer.train(&examples)?;
    if let Some(last) = summaries.last() {
        info!(
            mean_loss = last.mean_loss(),
            steps = trainer.steps(),
            "training finished"
        );
    }

    trainer.save(&cli.output_param, &cli.output_opt_data)?;
    Ok(())
}
