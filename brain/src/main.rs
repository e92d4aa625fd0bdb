mod celebration;
mod config;
mod context;
mod coordinator;
mod driver;
mod ekf;
mod filtering;
mod global_nav;
mod local_nav;
mod module;
mod motion_control;
mod outlier;
mod pool;
mod server;
mod state;
mod sync;
mod vision;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use config::POOL_SIZE;
use context::Context;
use coordinator::Coordinator;
use driver::LoopbackTransport;
use pool::Pool;
use vision::{Calibration, StillFrameSource, Vision};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "arena-brain", about = "On-host coordination kernel for the arena robot")]
struct Args {
    /// Operator WebSocket bind address
    #[arg(long, default_value = "127.0.0.1:8080")]
    serve_addr: String,
    /// Still frame replayed as the camera fallback
    #[arg(long, default_value = "frame.jpeg")]
    frame: PathBuf,
    /// Calibration file: arena corners and landmark seed colours
    #[arg(long, default_value = "calibration.toml")]
    calibration: PathBuf,
    /// Feed every camera fix into the estimator instead of only the
    /// initial one
    #[arg(long)]
    live_camera: bool,
    /// Attach the auxiliary actuator node
    #[arg(long)]
    aux: bool,
    /// Optimise planned paths
    #[arg(long)]
    optimise: bool,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arena_brain=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("🤖 arena-brain v{} starting", env!("CARGO_PKG_VERSION"));

    run(args).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    let transport = Arc::new(LoopbackTransport::with_aux(args.aux));
    let pool = Pool::new(POOL_SIZE);
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel();
    let ctx = Arc::new(Context::new(transport.clone(), pool.clone(), shutdown_tx));

    if args.optimise {
        ctx.store.with(|state| state.set_optimise(true));
    }

    // Vision startup: calibration problems are fatal, the run aborts here.
    let calibration = Calibration::load(&args.calibration)?;
    let source = StillFrameSource::open(&args.frame)?;
    let mut vision = Vision::new(Box::new(source), calibration);
    vision.calibrate()?;
    info!("camera calibrated");

    // Modules are scoped resources: the guards release their driver
    // callbacks and background tasks when the run ends.
    let _filtering = filtering::start(&ctx);
    let _global_nav = global_nav::start(&ctx);
    let _motion_control = motion_control::start(&ctx);
    let _local_nav = local_nav::start(&ctx);

    let server = tokio::spawn(server::serve(ctx.clone(), args.serve_addr.clone()));
    let coordinator = Coordinator::new(ctx.clone(), vision, args.live_camera);

    tokio::select! {
        _ = coordinator.run() => {}
        _ = shutdown_rx.recv() => info!("shutdown requested"),
        result = server => result??,
    }

    server::emergency_stop(&ctx);
    transport.close();
    pool.shutdown();
    info!("👋 released modules, exiting");
    Ok(())
}
