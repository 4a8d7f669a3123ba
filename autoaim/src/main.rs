//! Application entry point: configuration, logging, link and pipeline
//! lifetime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use tracing::{error, info, warn};

use armor_detector::{DigitClassifier, OnnxClassifier};
use autoaim_core::Pipeline;
use cam_source::SyntheticSource;
use gimbal_link::{AttitudeLink, GimbalLink};

#[derive(Debug, Parser)]
#[command(name = "autoaim", about = "realtime turret perception and fire control")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline.
    Run(RunArgs),
    /// Print the default configuration as TOML and exit.
    PrintConfig,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Path to the configuration file.
    #[arg(long, default_value = "autoaim.toml")]
    config: std::path::PathBuf,
    /// Substitute a null digit classifier (no model file required). All
    /// armor candidates are discarded, useful for plumbing bring-up only.
    #[arg(long)]
    skip_classifier: bool,
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}

/// Classifier stub used by `--skip-classifier`.
struct NullClassifier;

impl DigitClassifier for NullClassifier {
    fn classify(&mut self, _patch: &image::GrayImage) -> (autoaim_types::Labels, f64) {
        (autoaim_types::Labels::None, 0.0)
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::PrintConfig => {
            print!("{}", autoaim_config_data::default_config_toml()?);
            Ok(())
        }
        Command::Run(args) => run(args),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let cfg = autoaim_config_data::parse_config_file(&args.config)
        .with_context(|| format!("reading config {}", args.config.display()))?;

    let classifier: Box<dyn DigitClassifier> = if args.skip_classifier {
        warn!("running with the null classifier; nothing will be engaged");
        Box::new(NullClassifier)
    } else {
        Box::new(
            OnnxClassifier::new(&cfg.classifier).with_context(|| {
                format!(
                    "loading classifier model {}",
                    cfg.classifier.model_path.display()
                )
            })?,
        )
    };

    // The vendor camera SDK integrates by implementing
    // `cam_source::FrameSource`; this build ships the synthetic source.
    info!("using the synthetic frame source");
    let source = Box::new(SyntheticSource::new(&cfg.camera));

    let link = Arc::new(GimbalLink::open(cfg.port.clone()).context("opening serial link")?);
    let pipeline = Pipeline::start(
        &cfg,
        source,
        link.clone() as Arc<dyn AttitudeLink>,
        classifier,
    )
    .context("starting pipeline")?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("installing signal handler")?;
    }

    info!("running; ctrl-c to stop");
    while !stop.load(Ordering::SeqCst) && !pipeline.camera_failed() {
        std::thread::sleep(Duration::from_millis(50));
    }
    let camera_failed = pipeline.camera_failed();

    // Workers first, the shared link last.
    pipeline.stop();
    match Arc::try_unwrap(link) {
        Ok(link) => link.close(),
        Err(_) => warn!("link still referenced at shutdown"),
    }

    if camera_failed {
        error!("exiting after frame source failure");
        std::process::exit(1);
    }
    Ok(())
}
