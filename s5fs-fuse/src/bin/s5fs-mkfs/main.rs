mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use log::warn;
use memobj::PAGE_SIZE;
use s5fs::S5FileSystem;
use s5fs_fuse::BlockFile;
use vfs::{VnodeKind, NAME_LEN};

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let block_file = Arc::new(BlockFile({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&cli.out)?;
        fd.set_len(u64::from(cli.blocks) * PAGE_SIZE as u64)?;

        fd
    }));

    let s5 = S5FileSystem::format(block_file, cli.blocks, cli.inodes)
        .expect("formatting a fresh image");
    println!(
        "formatted {:?}: {} blocks, {} inodes",
        cli.out, cli.blocks, cli.inodes
    );

    if let Some(source) = &cli.source {
        let root = s5.root();
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!("skipping non-utf8 name {name:?}");
                continue;
            };
            if name.len() > NAME_LEN {
                warn!("skipping {name}: name too long");
                continue;
            }

            let data = fs::read(entry.path())?;
            let node = root
                .mknod(name, VnodeKind::Regular, 0)
                .expect("creating an imported file");
            let written = node.write(0, &data).expect("writing an imported file");
            assert_eq!(written, data.len(), "image ran out of space");
            println!("imported {name} ({written} bytes)");
        }
    }

    s5.unmount();
    Ok(())
}
