use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "depot",
    about = "Content-addressed artifact depot: import, export and maintain repositories",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Repository address: a directory, `file:` URI, `.zip` path or `jar:` URI
    #[arg(short = 'R', long, global = true, default_value = ".")]
    pub repo: String,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new repository
    Init(InitArgs),
    /// Import a directory as a new manifest version
    Import(ImportArgs),
    /// Write a manifest's tree to a directory
    Export(ExportArgs),
    /// List manifests, optionally below a name
    List(ListArgs),
    /// Show a manifest and its tree
    Show(ShowArgs),
    /// Delete a manifest
    Delete(DeleteArgs),
    /// Verify every reachable object
    Fsck(FsckArgs),
    /// Remove unreachable objects
    Prune(PruneArgs),
    /// Move shared objects into a pool and sweep it
    Reorganize(ReorganizeArgs),
    /// Copy everything a pooled repository reaches into a standalone one
    Unpool(UnpoolArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Shared pool to read through to
    #[arg(long)]
    pub pool: Option<PathBuf>,
    /// Worker threads per operation
    #[arg(long)]
    pub workers: Option<usize>,
    /// Do not keep an audit log
    #[arg(long)]
    pub no_audit: bool,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Directory to import
    pub source: PathBuf,
    /// Manifest key, `name:tag`
    pub key: String,
    /// Label as `name=value`; may be repeated
    #[arg(short, long = "label")]
    pub labels: Vec<String>,
}

#[derive(Args)]
pub struct ExportArgs {
    pub key: String,
    /// Empty or absent target directory
    pub target: PathBuf,
    /// Leave referenced manifests out
    #[arg(long)]
    pub shallow: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only this name and names below it
    pub name: Option<String>,
    /// Only the newest tag of this exact name
    #[arg(long)]
    pub latest: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    pub key: String,
    /// Tree levels to print
    #[arg(long, default_value = "1")]
    pub depth: usize,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub key: String,
}

#[derive(Args)]
pub struct FsckArgs {
    /// Delete damaged objects
    #[arg(long)]
    pub repair: bool,
}

#[derive(Args)]
pub struct PruneArgs {
    /// Report garbage without deleting it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct ReorganizeArgs {
    /// Pool directory
    pub pool: PathBuf,
    /// Every repository using the pool
    #[arg(required = true)]
    pub repositories: Vec<String>,
    /// Pool settings file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Minimum number of referring repositories
    #[arg(long)]
    pub threshold: Option<usize>,
}

#[derive(Args)]
pub struct UnpoolArgs {
    /// Address of the new standalone repository
    pub target: String,
}
