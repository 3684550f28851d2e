use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};

#[derive(Parser)]
#[command(version, about = "Administrative control surface for the snapshotting block store")]
pub struct Cli {
    /// Path to the device (a plain file holding the formatted image)
    pub device: PathBuf,

    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Lay out a fresh, empty image at `device`.
    Init {
        /// Total image size in bytes.
        #[arg(long, default_value_t = 64 * 1024 * 1024)]
        size: u64,
        /// Inode budget (see the format-time sizing note in the layout
        /// module).
        #[arg(long, default_value_t = 1024)]
        inodes: u32,
    },

    /// Manage the snapshot table.
    #[command(subcommand)]
    Snapshot(SnapshotCommand),

    /// List a directory's entries.
    Ls {
        /// Path to list; defaults to the root.
        #[arg(default_value = "/")]
        path: String,
    },

    /// Print a file's contents to stdout.
    Cat { path: String },

    /// Print an inode's metadata.
    Stat { path: String },
}

#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// Create a snapshot of the current live state.
    Create {
        /// Request a specific snapshot id instead of auto-assigning one.
        #[arg(long)]
        id: Option<u32>,
    },
    /// Delete a snapshot, releasing whatever it alone still references.
    Delete { id: u32 },
    /// Make the live state match a previously created snapshot.
    Restore { id: u32 },
    /// List every live snapshot.
    List,
}
