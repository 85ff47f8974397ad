//! Batch decoder entry point
//!
//! Usage: `lexdecode-batch <job.json> [--lattice-dir <dir>]`
//!
//! Decodes every utterance of a JSON job and prints one JSON line per utterance.

mod job;

use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use lexdecode_config::{load_settings, Settings};
use lexdecode_search::{Decoder, DecoderResources, LatticeFile};

use job::{DecodeJob, UtteranceReport};

#[derive(Parser, Debug)]
#[command(name = "lexdecode-batch", version, about = "Decode the utterances of a JSON job")]
struct Args {
    /// Decode job (models plus utterance scores)
    job: PathBuf,

    /// Write one lattice file per utterance into this directory (enables the lattice pass)
    #[arg(long, value_name = "DIR")]
    lattice_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Priority: env vars > config/{env}.toml > config/default.toml > defaults
    let env = std::env::var("LEXDECODE_ENV").ok();
    let mut settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };
    if args.lattice_dir.is_some() {
        settings.lattice.enabled = true;
    }

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_env = env.as_deref().unwrap_or("default"),
        job = %args.job.display(),
        "Starting batch decode"
    );

    let job = DecodeJob::load(&args.job)?;
    let models = job.models()?;
    let resources = DecoderResources::new(
        models.dict.clone(),
        models.model.clone(),
        models.lm.clone(),
        &settings.language_model,
    )?;
    let mut decoder = Decoder::new(resources, &settings)?;

    if let Some(dir) = &args.lattice_dir {
        std::fs::create_dir_all(dir)?;
    }

    for utt in &job.utterances {
        let mut scorer = utt.scorer(&models)?;
        let outcome = decoder.decode(&utt.id, &mut scorer)?;
        println!("{}", serde_json::to_string(&UtteranceReport::new(&outcome))?);

        if let (Some(dir), Some(dag)) = (&args.lattice_dir, &outcome.lattice) {
            let path = lattice_path(dir, &utt.id);
            LatticeFile::from_dag(dag, &models.dict).write(&path)?;
            tracing::debug!(utterance = %utt.id, path = %path.display(), "Lattice written");
        }
    }

    let stats = decoder.stats();
    tracing::info!(
        utterances = stats.utterances,
        recognized = stats.recognized,
        no_recognition = stats.no_recognition,
        aborted = stats.aborted,
        lattice_fallbacks = stats.lattice_fallbacks,
        frames = stats.frames,
        "Batch finished"
    );
    Ok(())
}

fn lattice_path(dir: &Path, utterance: &str) -> PathBuf {
    let name: String = utterance
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{}.lat.json", name))
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("lexdecode_core={level},lexdecode_config={level},lexdecode_search={level},lexdecode_batch={level}").into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    // Logs go to stderr; stdout carries the results
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed()
    };
    subscriber.with(fmt_layer).init();
}
