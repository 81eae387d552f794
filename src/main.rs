use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

mod gfx;
mod parser;
mod ppm_writer;

/// Minimal PPM (P6) image viewer.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Image to open at startup. `O` opens the file picker, `S` saves a copy
    /// of the displayed image.
    path: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    gfx::run(args.path)
}
