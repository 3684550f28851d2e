use std::io::Write;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ouifs_core::{InodeType, Ufs, B};

use crate::cli::{Cli, Command, SnapshotCommand};
use crate::hooks::StandaloneHooks;

mod cli;
mod hooks;

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::builder()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    if let Command::Init { size, inodes } = cli.command {
        Ufs::format(&cli.device, size, inodes, StandaloneHooks).context("formatting image")?;
        println!("formatted {} ({size} bytes, {inodes} inodes)", cli.device.display());
        return Ok(());
    }

    let fs = Ufs::open(&cli.device, true, StandaloneHooks).context("opening image")?;

    match cli.command {
        Command::Init { .. } => unreachable!("handled above"),
        Command::Snapshot(cmd) => run_snapshot(&fs, cmd)?,
        Command::Ls { path } => run_ls(&fs, &path)?,
        Command::Cat { path } => run_cat(&fs, &path)?,
        Command::Stat { path } => run_stat(&fs, &path)?,
    }

    Ok(())
}

fn run_snapshot(fs: &Ufs<std::fs::File, StandaloneHooks>, cmd: SnapshotCommand) -> Result<()> {
    match cmd {
        SnapshotCommand::Create { id } => {
            let id = fs.snapshot_create(id.unwrap_or(0)).context("creating snapshot")?;
            println!("created snapshot {id}");
        }
        SnapshotCommand::Delete { id } => {
            fs.snapshot_delete(id).context("deleting snapshot")?;
            println!("deleted snapshot {id}");
        }
        SnapshotCommand::Restore { id } => {
            fs.snapshot_restore(id).context("restoring snapshot")?;
            println!("restored snapshot {id}");
        }
        SnapshotCommand::List => {
            let mut buf = [0u8; 4096];
            let n = fs.snapshot_list(&mut buf);
            std::io::stdout().write_all(&buf[..n])?;
        }
    }
    Ok(())
}

fn run_ls(fs: &Ufs<std::fs::File, StandaloneHooks>, path: &str) -> Result<()> {
    let ino = fs.resolve_path(path).with_context(|| format!("resolving {path}"))?;
    if fs.kind_of(ino)? != InodeType::Directory {
        bail!("{path} is not a directory");
    }
    let mut entries = fs.readdir(ino)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    for e in entries {
        let attr = fs.getattr(e.ino)?;
        let tag = match attr.kind {
            InodeType::Directory => '/',
            InodeType::File => ' ',
        };
        println!("{:>8}  {}{tag}", attr.size, e.name);
    }
    Ok(())
}

fn run_cat(fs: &Ufs<std::fs::File, StandaloneHooks>, path: &str) -> Result<()> {
    let ino = fs.resolve_path(path).with_context(|| format!("resolving {path}"))?;
    let attr = fs.getattr(ino)?;
    if attr.kind != InodeType::File {
        bail!("{path} is a directory");
    }
    let mut offset = 0u64;
    let mut buf = vec![0u8; B as usize];
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while offset < attr.size {
        let n = fs.read(ino, offset, &mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        offset += n as u64;
    }
    Ok(())
}

fn run_stat(fs: &Ufs<std::fs::File, StandaloneHooks>, path: &str) -> Result<()> {
    let ino = fs.resolve_path(path).with_context(|| format!("resolving {path}"))?;
    let attr = fs.getattr(ino)?;
    println!("inode:  {}", attr.ino);
    println!("kind:   {}", match attr.kind {
        InodeType::File => "file",
        InodeType::Directory => "directory",
    });
    println!("size:   {}", attr.size);
    println!("blocks: {}", attr.blocks);
    println!("nlink:  {}", attr.nlink);
    println!("mtime:  {}.{:09}", attr.mtime.0, attr.mtime.1);
    Ok(())
}
