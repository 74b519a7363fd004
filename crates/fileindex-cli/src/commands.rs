use clap::{Args, Parser, Subcommand};
use fileindex_core::AppConfig;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "fileindex")]
#[command(about = "Indexes file archives and keeps deduplicated backups", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Catalog database file
    #[arg(long, global = true)]
    pub catalog: Option<String>,

    /// Always compute full hashes instead of trusting unchanged size and time
    #[arg(long, global = true)]
    pub no_fast_mode: bool,

    /// Only hash the first MiB of every file
    #[arg(long, global = true)]
    pub hash_first_mb: bool,

    /// Worker threads; 1 disables multithreading
    #[arg(long, global = true)]
    pub threads: Option<usize>,
}

impl Cli {
    /// Applies command line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(catalog) = &self.catalog {
            config.catalog_path = catalog.clone();
        }
        if self.no_fast_mode {
            config.fast_mode = false;
        }
        if self.hash_first_mb {
            config.hash_only_first_mb = true;
        }
        match self.threads {
            Some(1) => config.multithreading = false,
            Some(threads) => config.max_threads = threads.max(1),
            None => {}
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Index a directory tree into the catalog
    Index(IndexArgs),
    /// Back up a directory into a new timestamped folder below the target
    Backup(BackupArgs),
    /// Make the target an exact copy of the source
    Sync(SyncArgs),
    /// Compare the newest index of a directory with the files on disk
    Verify {
        dir: PathBuf,
        /// Also consider runs that ended with failures
        #[arg(long)]
        include_failed: bool,
    },
    /// List files present in more than one place
    Duplicates {
        /// Directories to search; repeat a directory to search within it
        #[arg(required = true, num_args = 2..)]
        dirs: Vec<PathBuf>,
        /// Only match files with the same name
        #[arg(long)]
        filename: bool,
    },
    /// List files of a directory without a copy in any of the others
    Orphans {
        reference: PathBuf,
        #[arg(required = true)]
        others: Vec<PathBuf>,
        /// List files of the others missing in the reference instead
        #[arg(long)]
        reverse: bool,
    },
    /// Show the files that differ between two index runs
    Compare { first: i64, second: i64 },
    /// Delete an index run and everything only it referenced
    Remove {
        run_id: i64,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// List all index runs
    List,
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    pub dir: PathBuf,
    /// Restrict indexing to these directories relative to the root
    #[arg(long = "include")]
    pub include_paths: Vec<String>,
    /// Reuse hashes from the newest index of this directory
    #[arg(long)]
    pub last_index_dir: Option<PathBuf>,
    #[arg(long)]
    pub medium: Option<String>,
    #[arg(long)]
    pub serial: Option<String>,
    #[arg(long)]
    pub readonly: bool,
}

#[derive(Debug, Args)]
pub struct BackupArgs {
    pub source: PathBuf,
    pub target: PathBuf,
    /// Index the source first
    #[arg(long)]
    pub index: bool,
    /// Continue even when many files changed
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long)]
    pub medium: Option<String>,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    pub source: PathBuf,
    pub target: PathBuf,
    /// Index the source first
    #[arg(long)]
    pub index: bool,
    /// Continue even when many files changed
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dry_run: bool,
}
