//! Command-line interface for the NFSv4.1 client.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// nfs4 - Talk to an NFSv4.1 server without mounting it.
#[derive(Parser)]
#[command(name = "nfs4")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "NFS4_CONFIG")]
    pub config: Option<PathBuf>,

    /// Server address, overriding the configuration
    #[arg(short, long, env = "NFS4_SERVER")]
    pub server: Option<SocketAddr>,

    /// Export path, overriding the configuration
    #[arg(short, long, env = "NFS4_EXPORT")]
    pub export: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "NFS4_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Disable pNFS and send all file data through the metadata server
    #[arg(long)]
    pub no_pnfs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// List a directory
    Ls {
        /// Directory path
        #[arg(default_value = "/")]
        path: String,

        /// Show mode, size and owner
        #[arg(short, long)]
        long: bool,
    },

    /// Create a directory
    Mkdir {
        /// Directory path
        path: String,
    },

    /// Show file attributes
    Stat {
        /// File path
        path: String,
    },

    /// Copy a remote file to stdout or a local file
    Get {
        /// Remote path
        path: String,

        /// Local destination
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Copy a local file to the server
    Put {
        /// Local source
        local: PathBuf,

        /// Remote path
        path: String,
    },

    /// Remove a file or an empty directory
    Rm {
        /// Remote path
        path: String,
    },

    /// Show FS_LOCATIONS of a path
    Locations {
        /// Remote path
        #[arg(default_value = "/")]
        path: String,
    },
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
