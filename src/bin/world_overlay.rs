//! world_overlay - ground-position overlay daemon
//!
//! This daemon:
//! 1. Loads and validates the camera configuration (fatal on any error)
//! 2. Builds the capture → infer → osd → encode → UDP pipeline
//! 3. Labels every detection with its estimated ground position
//! 4. Runs until end of stream, a pipeline error, or Ctrl-C

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use world_overlay::{launch_description, OverlayConfig, OverlayPipeline};

#[derive(Parser, Debug)]
#[command(author, version, about = "Overlay ground positions on live detections")]
struct Args {
    /// Path to the camera configuration (TOML, or JSON by extension).
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration, print the launch description, and exit.
    #[arg(long)]
    check_config: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg =
        OverlayConfig::load(args.config.as_deref()).context("invalid camera configuration")?;

    let camera = &cfg.camera;
    log::info!(
        "camera device={} resolution={}x{} position={:?} fov={:?}",
        camera.device(),
        camera.width(),
        camera.height(),
        camera.position(),
        camera.fov()
    );
    if camera.rotation() != [0.0; 3] {
        log::warn!(
            "rotation {:?} is accepted but not applied to the ground projection",
            camera.rotation()
        );
    }

    if args.check_config {
        println!("{}", launch_description(&cfg.camera, &cfg.pipeline));
        return Ok(());
    }

    let mut pipeline = OverlayPipeline::new(&cfg)?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    log::info!(
        "world_overlay running. streaming to {}:{}",
        cfg.pipeline.sink_host,
        cfg.pipeline.sink_port
    );
    pipeline.run(&stop)?;
    log::info!("world_overlay stopped");
    Ok(())
}
