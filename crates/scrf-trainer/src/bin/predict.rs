//! Segmental CRF decoding
//!
//! Prints the best label sequence of every utterance in a frame batch, one
//! line per utterance.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use scrf_trainer::{
    FrameReader, ParamSet, Predictor, TrainConfig, format_prediction, load_arpa_bigram,
    load_labels,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scrf-predict")]
#[command(about = "Decode frame data with a trained segmental CRF")]
#[command(version)]
struct Cli {
    /// Frame batch to decode
    #[arg(long)]
    frames: PathBuf,

    #[arg(long)]
    labels: PathBuf,

    /// Trained parameters
    #[arg(long)]
    param: PathBuf,

    /// ARPA bigram language model used in training, if any
    #[arg(long)]
    lm: Option<PathBuf>,

    /// JSON config used in training
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the config's feature list
    #[arg(long)]
    features: Option<String>,

    #[arg(long)]
    min_seg: Option<usize>,

    #[arg(long)]
    max_seg: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => TrainConfig::load(path)?,
        None => TrainConfig::default(),
    };
    if let Some(features) = cli.features {
        config.features = features;
    }
    if let Some(min_seg) = cli.min_seg {
        config.segmentation.min_seg = min_seg;
    }
    if let Some(max_seg) = cli.max_seg {
        config.segmentation.max_seg = max_seg;
    }

    let labels = load_labels(&cli.labels)?;
    let lm = cli.lm.as_ref().map(load_arpa_bigram).transpose()?;
    let params = ParamSet::load(&cli.param)?;

    let mut reader = FrameReader::open(&cli.frames)?;
    // frame width is only known once the first utterance is read
    let Some(first) = reader.next_utterance()? else {
        warn!(frames = %cli.frames.display(), "no utterances");
        return Ok(());
    };
    let predictor = Predictor::new(&config, labels, lm, params, first.frames.ncols())
        .context("parameters do not match the features")?;

    let mut decoded = 0usize;
    for utt in std::iter::once(Ok(first)).chain(reader) {
        let utt = utt?;
        match predictor.predict(&utt) {
            Ok(segments) => {
                println!("{}", format_prediction(&utt.name, &segments));
                decoded += 1;
            }
            Err(e) if e.is_per_example() => {
                warn!(utterance = %utt.name, error = %e, "no prediction");
                println!("{}", format_prediction(&utt.name, &[]));
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(decoded, "done");
    Ok(())
}
