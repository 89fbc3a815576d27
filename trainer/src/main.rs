use anyhow::Context;
use burn::backend::{Autodiff, NdArray};
use clap::Parser;
use generator::profile::{write_data_root, SyntheticProfile};
use log::info;
use monitor::bridge::{default_bind_address, StatusBridge};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::{ExperimentConfig, TaskMode};
use workflow::runner::Runner;

mod generator;
mod monitor;
mod workflow;

type TrainBackend = Autodiff<NdArray<f32>>;

#[derive(Parser)]
#[command(author, version, about = "Radar target-recognition training driver")]
struct Args {
    /// Experiment config in YAML
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long, value_enum)]
    task: Option<TaskMode>,
    /// Train on random causal prefixes
    #[arg(long, default_value_t = false)]
    causal: bool,
    /// Generate N synthetic episodes per class into a temporary data root and train on it
    #[arg(long)]
    synthetic: Option<usize>,
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
    /// Expose training progress on GET /status
    #[arg(long, default_value_t = false)]
    serve: bool,
    #[arg(long, default_value_t = default_bind_address())]
    bind: SocketAddr,
    /// Keep the status endpoint alive after training until Ctrl+C
    #[arg(long, default_value_t = false)]
    hold: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = ExperimentConfig::load(&args.config)?;
    if let Some(epochs) = args.epochs {
        config.train.epochs = epochs;
    }
    if let Some(task) = args.task {
        config.train.task = task;
    }
    if args.causal {
        config.data.causal = true;
    }
    if let Some(dir) = args.checkpoint_dir {
        config.train.checkpoint_dir = dir;
    }

    let _synthetic_root = match args.synthetic {
        Some(episodes_per_class) => {
            let root = tempfile::tempdir().context("creating synthetic data root")?;
            let profile = SyntheticProfile {
                num_classes: config.data.num_classes,
                episodes_per_class,
                seed: config.data.seed.unwrap_or_default(),
                ..SyntheticProfile::default()
            };
            let written = write_data_root(&profile, root.path())?;
            info!("wrote {} synthetic episodes to {}", written, root.path().display());
            config.data.data_root = root.path().to_path_buf();
            Some(root)
        }
        None => None,
    };
    config.validate().context("validating overridden config")?;

    let bridge = Arc::new(StatusBridge::new());
    if args.serve {
        bridge
            .serve(args.bind)
            .context("starting the status endpoint")?;
    }

    let runner = Runner::<TrainBackend>::new(config, Default::default()).with_status(bridge.clone());
    let summary = runner.execute()?;
    println!(
        "Training done -> epochs {}, best epoch {:?}, best accuracy {:.3}",
        summary.epochs.len(),
        summary.best_epoch,
        summary.best_val_accuracy
    );

    if args.serve && args.hold {
        info!("status endpoint still running (Ctrl+C to stop)...");
        let runtime = TokioBuilder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for signal handling")?;
        runtime.block_on(async {
            signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
            Ok::<(), anyhow::Error>(())
        })?;
    }

    Ok(())
}
