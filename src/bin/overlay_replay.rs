//! overlay_replay - run the annotation stage over recorded detections
//!
//! Reads one `BatchMeta` JSON document per line, labels every object, and
//! writes the annotated batch to stdout as JSON lines. A blank line stands for
//! a buffer without analytics and produces no output.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use world_overlay::{BatchMeta, FrameAnnotator, OverlayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Annotate recorded detection batches")]
struct Args {
    /// Path to the camera configuration (TOML, or JSON by extension).
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,

    /// JSON-lines input. Reads stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let cfg =
        OverlayConfig::load(args.config.as_deref()).context("invalid camera configuration")?;
    let annotator = FrameAnnotator::new(&cfg.camera);

    let input: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("open {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut out = BufWriter::new(io::stdout().lock());

    let mut batches = 0u64;
    let mut skipped = 0u64;
    let mut objects = 0usize;
    for (n, line) in input.lines().enumerate() {
        let line = line.context("read input")?;
        if line.trim().is_empty() {
            skipped += 1;
            continue;
        }
        let mut batch: BatchMeta = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid detection batch", n + 1))?;
        let summary = annotator.annotate(Some(&mut batch));
        batches += 1;
        objects += summary.objects;
        serde_json::to_writer(&mut out, &batch).context("write batch")?;
        out.write_all(b"\n").context("write batch")?;
    }
    out.flush().context("flush output")?;

    log::info!(
        "annotated {} objects in {} batches, {} without analytics",
        objects,
        batches,
        skipped
    );
    Ok(())
}
