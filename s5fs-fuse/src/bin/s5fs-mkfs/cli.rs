use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Output image path
    #[arg(long, short, default_value = "fs.img")]
    pub out: PathBuf,

    /// Total blocks of the image
    #[arg(long, short, default_value_t = 4096)]
    pub blocks: u32,

    /// Number of inodes
    #[arg(long, short, default_value_t = 256)]
    pub inodes: u32,

    /// Copy regular files from this directory into the image root
    #[arg(long, short = 'S')]
    pub source: Option<PathBuf>,
}
