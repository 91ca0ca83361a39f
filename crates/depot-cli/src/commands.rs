use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use depot_manifest::{Manifest, ManifestStore};
use depot_pool::{unpool, PoolConfig, PoolOrganizer};
use depot_repo::ops::{
    CheckConsistency, DeleteManifest, ExportManifest, ImportTree, ListManifests, Prune,
    ScanManifest, ShowManifest,
};
use depot_repo::{
    ManifestKey, Repository, RepositoryAddress, RepositoryConfig, ScanNode, ScanOptions,
};
use serde::Serialize;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let repo = cli.repo;
    match cli.command {
        Command::Init(args) => cmd_init(&repo, args),
        Command::Import(args) => with_repo(&repo, |r| cmd_import(r, args, format)),
        Command::Export(args) => with_repo(&repo, |r| cmd_export(r, args)),
        Command::List(args) => with_repo(&repo, |r| cmd_list(r, args, format)),
        Command::Show(args) => with_repo(&repo, |r| cmd_show(r, args, format)),
        Command::Delete(args) => with_repo(&repo, |r| cmd_delete(r, args)),
        Command::Fsck(args) => with_repo(&repo, |r| cmd_fsck(r, args, format)),
        Command::Prune(args) => with_repo(&repo, |r| cmd_prune(r, args, format)),
        Command::Reorganize(args) => cmd_reorganize(args, format),
        Command::Unpool(args) => with_repo(&repo, |r| cmd_unpool(r, args, format)),
    }
}

fn open(address: &str) -> anyhow::Result<Repository> {
    let address: RepositoryAddress = address.parse()?;
    Repository::open(&address).with_context(|| format!("cannot open repository {address}"))
}

/// Open, run, and close (re-packing archives) even if `f` failed.
fn with_repo(
    address: &str,
    f: impl FnOnce(&Repository) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let repo = open(address)?;
    let result = f(&repo);
    repo.close()?;
    result
}

fn parse_key(key: &str) -> anyhow::Result<ManifestKey> {
    key.parse()
        .with_context(|| format!("invalid manifest key {key:?}, expected name:tag"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(address: &str, args: InitArgs) -> anyhow::Result<()> {
    let address: RepositoryAddress = address.parse()?;
    let mut config = RepositoryConfig {
        pool: args.pool,
        audit: !args.no_audit,
        ..Default::default()
    };
    if let Some(workers) = args.workers {
        config.worker_threads = workers;
    }
    let repo = Repository::init(&address, config)?;
    repo.close()?;
    println!("{} Initialized repository at {}", "✓".green().bold(), address.to_string().bold());
    Ok(())
}

fn cmd_import(repo: &Repository, args: ImportArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut op = ImportTree::new(&args.source, parse_key(&args.key)?);
    for label in &args.labels {
        let (name, value) = label
            .split_once('=')
            .ok_or_else(|| anyhow!("label {label:?} must be name=value"))?;
        op = op.label(name, value);
    }
    let manifest = repo.execute(op)?;
    match format {
        OutputFormat::Json => print_json(&manifest),
        OutputFormat::Text => {
            println!(
                "{} Imported {} (root {})",
                "✓".green().bold(),
                manifest.key().to_string().yellow(),
                manifest.root().short_hex().dimmed()
            );
            Ok(())
        }
    }
}

fn cmd_export(repo: &Repository, args: ExportArgs) -> anyhow::Result<()> {
    let mut op = ExportManifest::new(parse_key(&args.key)?, &args.target);
    if args.shallow {
        op = op.shallow();
    }
    repo.execute(op)?;
    println!("{} Exported {} to {}", "✓".green().bold(), args.key.yellow(), args.target.display());
    Ok(())
}

fn cmd_list(repo: &Repository, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let keys: Vec<ManifestKey> = if args.latest {
        let Some(name) = &args.name else {
            bail!("--latest needs a name");
        };
        repo.manifests().latest(name)?.into_iter().collect()
    } else {
        repo.execute(ListManifests { name: args.name })?
            .into_iter()
            .collect()
    };
    match format {
        OutputFormat::Json => print_json(&keys),
        OutputFormat::Text => {
            for key in &keys {
                println!("{}:{}", key.name(), key.tag().yellow());
            }
            Ok(())
        }
    }
}

fn cmd_show(repo: &Repository, args: ShowArgs, format: OutputFormat) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    let manifest: Manifest = repo.execute(ShowManifest { key: key.clone() })?;
    if format == OutputFormat::Json {
        return print_json(&manifest);
    }
    println!("{} {}", "manifest".bold(), manifest.key().to_string().yellow());
    println!("  root: {}", manifest.root());
    for (name, value) in manifest.labels() {
        println!("  {name}: {value}");
    }
    let tree = repo.execute(ScanManifest {
        key,
        options: ScanOptions::depth(args.depth),
    })?;
    print_node("", &tree, 1);
    Ok(())
}

fn print_node(name: &str, node: &ScanNode, indent: usize) {
    let pad = "  ".repeat(indent);
    match node {
        ScanNode::Blob { id, size } => {
            println!("{pad}{name}  {}  {size} bytes", id.short_hex().dimmed())
        }
        ScanNode::Tree { id, entries } => {
            if !name.is_empty() {
                println!("{pad}{}/  {}", name.bold(), id.short_hex().dimmed());
            }
            let child_indent = if name.is_empty() { indent } else { indent + 1 };
            for (key, child) in entries {
                print_node(&key.name, child, child_indent);
            }
        }
        ScanNode::Reference { manifest, target, .. } => {
            let state = if target.is_some() { "".normal() } else { " (absent)".red() };
            println!("{pad}{} -> {}{state}", name.cyan(), manifest.to_string().yellow());
        }
        ScanNode::Unexpanded { id, entry_type } => {
            println!("{pad}{name}  {}  ({entry_type}, not expanded)", id.short_hex().dimmed())
        }
        ScanNode::Missing { id, entry_type } => {
            println!("{pad}{name}  {}  {}", id.short_hex().dimmed(), format!("missing {entry_type}").red())
        }
    }
}

fn cmd_delete(repo: &Repository, args: DeleteArgs) -> anyhow::Result<()> {
    let key = parse_key(&args.key)?;
    if repo.execute(DeleteManifest { key: key.clone() })? {
        println!("{} Deleted {}", "✓".green().bold(), key.to_string().yellow());
    } else {
        println!("No manifest {}", key.to_string().yellow());
    }
    Ok(())
}

fn cmd_fsck(repo: &Repository, args: FsckArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = repo.execute(CheckConsistency {
        repair: args.repair,
    })?;
    if format == OutputFormat::Json {
        print_json(&report)?;
    } else if report.is_clean() {
        println!(
            "{} {} manifests, {} objects verified, no issues",
            "✓".green().bold(),
            report.manifests,
            report.verified
        );
    } else {
        for id in &report.missing {
            println!("{} {id}", "missing".red());
        }
        for id in &report.damaged {
            println!("{} {id}", "damaged".red().bold());
        }
        for key in &report.incomplete {
            println!("{} {}", "incomplete".yellow(), key);
        }
        if !report.repaired.is_empty() {
            println!("Removed {} damaged objects", report.repaired.len());
        }
    }
    if report.is_clean() {
        Ok(())
    } else {
        bail!(
            "{} missing and {} damaged objects",
            report.missing.len(),
            report.damaged.len()
        )
    }
}

fn cmd_prune(repo: &Repository, args: PruneArgs, format: OutputFormat) -> anyhow::Result<()> {
    let report = repo.execute(Prune {
        dry_run: args.dry_run,
    })?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            let verb = if args.dry_run { "Would remove" } else { "Removed" };
            let count = if args.dry_run {
                report.garbage.len()
            } else {
                report.removed.len()
            };
            println!(
                "{} {verb} {count} of {} objects ({} protected by open transactions)",
                "✓".green().bold(),
                report.examined,
                report.marked
            );
            for (id, reason) in &report.failed {
                println!("  {} {id}: {reason}", "not removed".yellow());
            }
        }
    }
    Ok(())
}

fn cmd_reorganize(args: ReorganizeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => PoolConfig::load(path)?,
        None => PoolConfig::default(),
    };
    if let Some(threshold) = args.threshold {
        config.usage_threshold = threshold;
    }
    let repos = args
        .repositories
        .iter()
        .map(|a| open(a))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let refs: Vec<&Repository> = repos.iter().collect();
    let pool = depot_store::FsObjectStore::open(&args.pool)?;

    let result = PoolOrganizer::new(&pool, &refs, config).and_then(|o| o.reorganize());
    for repo in &repos {
        repo.close()?;
    }
    let report = result?;
    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!(
                "{} {} objects indexed across {} repositories",
                "✓".green().bold(),
                report.indexed,
                report.repositories
            );
            println!("  promoted to pool: {}", report.promoted.len());
            println!("  local copies removed: {}", report.local_removed);
            println!("  swept from pool: {}", report.swept.len());
            if !report.unavailable.is_empty() {
                println!("  {} {}", "unavailable:".yellow(), report.unavailable.len());
            }
            Ok(())
        }
    }
}

fn cmd_unpool(repo: &Repository, args: UnpoolArgs, format: OutputFormat) -> anyhow::Result<()> {
    let address: RepositoryAddress = args.target.parse()?;
    let config = RepositoryConfig {
        pool: None,
        ..repo.config().clone()
    };
    let target = Repository::init(&address, config)?;

    let report = unpool(repo, target.local_objects())?;
    // Manifests are small; copy them so the target is usable on its own.
    let mut manifests = 0;
    for key in repo.manifests().list_all()? {
        target.manifests().add(&repo.manifests().get(&key)?)?;
        manifests += 1;
    }
    target.close()?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Text => {
            println!(
                "{} Copied {} objects and {} manifests to {}",
                "✓".green().bold(),
                report.copied,
                manifests,
                address.to_string().bold()
            );
            if !report.missing.is_empty() {
                println!("  {} {}", "missing:".red(), report.missing.len());
            }
            Ok(())
        }
    }
}
