mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{BackupArgs, Cli, Commands, IndexArgs, SyncArgs};
use dotenv::dotenv;
use fileindex_core::actions::{self, OrphanDirection};
use fileindex_core::{
    AppConfig, Catalog, CatalogOptions, Error, IndexOptions, Indexer, LocatedFile, RunContext,
};
use indicatif::HumanBytes;
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let mut config = match fileindex_core::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    args.apply(&mut config);
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    let ctx = RunContext::new();
    let cancel = ctx.cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        eprintln!("{}", "Cancelling...".yellow());
        cancel.cancel();
    }) {
        warn!("Ctrl-C handler not installed: {}", err);
    }

    if let Err(err) = run(command, &config, &ctx) {
        if matches!(err.downcast_ref::<Error>(), Some(Error::Cancelled)) {
            warn!("Cancelled");
            process::exit(130);
        }
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn open_catalog(config: &AppConfig) -> anyhow::Result<Catalog> {
    Catalog::open_with(&config.catalog_path, CatalogOptions::from(config))
        .with_context(|| format!("opening catalog {}", config.catalog_path))
}

fn run(command: Commands, config: &AppConfig, ctx: &RunContext) -> anyhow::Result<()> {
    match command {
        Commands::Index(args) => run_index(args, config, ctx),
        Commands::Backup(args) => run_backup(args, config, ctx),
        Commands::Sync(args) => run_sync(args, config, ctx),
        Commands::Verify {
            dir,
            include_failed,
        } => {
            let catalog = open_catalog(config)?;
            let report = actions::verify_dir(&catalog, config, &dir, !include_failed, ctx)?;
            for difference in &report.differences {
                println!("{}", difference.to_string().red());
            }
            match &report.index_run {
                None => println!("{} was never indexed", dir.display()),
                Some(run) if report.is_clean() => println!(
                    "{} files of run {} verified, {}",
                    report.checked,
                    run.id,
                    "no differences".green()
                ),
                Some(run) => println!(
                    "{} files of run {} verified, {}",
                    report.checked,
                    run.id,
                    format!("{} differences", report.differences.len()).red()
                ),
            }
            Ok(())
        }
        Commands::Duplicates { dirs, filename } => {
            let catalog = open_catalog(config)?;
            let report = actions::find_duplicates(&catalog, &dirs, filename)?;
            for group in &report.groups {
                println!("{}", HumanBytes(group.size).to_string().cyan());
                for file in &group.files {
                    println!("    {}", file.file_path().display());
                }
            }
            info!(
                "{} duplicate groups, {} files with duplicates, {} wasted",
                format!("{}", report.groups.len()).red(),
                format!("{}", report.duplicate_files()).red(),
                HumanBytes(report.wasted_bytes).to_string().red(),
            );
            Ok(())
        }
        Commands::Orphans {
            reference,
            others,
            reverse,
        } => {
            let catalog = open_catalog(config)?;
            let direction = if reverse {
                OrphanDirection::MissingInReference
            } else {
                OrphanDirection::MissingInOthers
            };
            let orphans = actions::files_without_copy(&catalog, &reference, &others, direction)?;
            print_files(&orphans);
            info!("{} files without a copy", format!("{}", orphans.len()).red());
            Ok(())
        }
        Commands::Compare { first, second } => {
            let catalog = open_catalog(config)?;
            let comparison = actions::compare_runs(&catalog, first, second)?;
            if comparison.is_identical() {
                println!("Runs {} and {} are {}", first, second, "identical".green());
                return Ok(());
            }
            println!("{}", format!("Only in run {}:", first).yellow());
            print_files(&comparison.only_in_first);
            println!("{}", format!("Only in run {}:", second).yellow());
            print_files(&comparison.only_in_second);
            Ok(())
        }
        Commands::Remove { run_id, yes } => {
            let catalog = open_catalog(config)?;
            let run = catalog.get_index_run(run_id)?;
            let prompt = format!("Remove {}?", actions::describe_run(&run));
            if !yes && !prompt_confirm(&prompt, Some(false))? {
                return Ok(());
            }
            let stats = actions::remove_run(&catalog, run_id)?;
            println!(
                "Removed run {}: {} locations, {} contents, {} paths",
                run_id, stats.locations, stats.contents, stats.paths
            );
            Ok(())
        }
        Commands::List => {
            let catalog = open_catalog(config)?;
            for summary in actions::list_runs(&catalog)? {
                println!(
                    "{}  {} files",
                    actions::describe_run(&summary.index_run),
                    summary.files
                );
            }
            Ok(())
        }
        Commands::PrintConfig => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
    }
}

fn run_index(args: IndexArgs, config: &AppConfig, ctx: &RunContext) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    let reporter = CliReporter::new(ctx.stats.clone());
    let options = IndexOptions {
        include_paths: args.include_paths,
        last_index_dir: args.last_index_dir,
        medium_description: args.medium,
        medium_serial: args.serial,
        readonly_medium: args.readonly,
    };
    let outcome = Indexer::new(&catalog, config)
        .with_reporter(&reporter)
        .index(&args.dir, &options, ctx)?;

    println!();
    info!(
        "Run {}: {} files, {} in {}",
        outcome.index_run.id,
        format!("{}", outcome.indexed_files).green(),
        HumanBytes(outcome.indexed_bytes),
        format!("{:.2}s", outcome.elapsed.as_secs_f64()).green(),
    );
    for entry in &outcome.unmatched_excludes {
        warn!("Exclude entry {} matched nothing", entry);
    }
    report_failures(&outcome.failures);
    Ok(())
}

fn run_backup(args: BackupArgs, config: &AppConfig, ctx: &RunContext) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    let reporter = CliReporter::new(ctx.stats.clone());
    let options = actions::BackupOptions {
        index_source: args.index,
        force: args.force,
        dry_run: args.dry_run,
        medium_description: args.medium,
    };
    let outcome = actions::Backup::new(&catalog, config)
        .with_reporter(&reporter)
        .run(&args.source, &args.target, &options, ctx)?;

    let summary = &outcome.summary;
    info!(
        "{} unchanged, {} new, {} changed, {} renamed, {} moved, {} renamed and moved, {} deleted",
        summary.unchanged.len(),
        format!("{}", summary.new.len()).green(),
        format!("{}", summary.changed.len()).yellow(),
        summary.renamed.len(),
        summary.moved.len(),
        summary.renamed_and_moved.len(),
        format!("{}", summary.deleted.len()).red(),
    );
    if args.dry_run {
        info!(
            "Dry run: {} files to copy, {} to link, {} needed",
            outcome.copied_files,
            outcome.linked_files,
            HumanBytes(outcome.needed_bytes)
        );
        return Ok(());
    }
    info!(
        "Backup in {}: {} copied ({}), {} linked",
        outcome.backup_dir.display(),
        format!("{}", outcome.copied_files).green(),
        HumanBytes(outcome.copied_bytes),
        format!("{}", outcome.linked_files).cyan(),
    );
    report_failures(&outcome.failures);
    Ok(())
}

fn run_sync(args: SyncArgs, config: &AppConfig, ctx: &RunContext) -> anyhow::Result<()> {
    let catalog = open_catalog(config)?;
    let reporter = CliReporter::new(ctx.stats.clone());
    let options = actions::SyncOptions {
        index_source: args.index,
        force: args.force,
        dry_run: args.dry_run,
    };
    let outcome = actions::Synchronizer::new(&catalog, config)
        .with_reporter(&reporter)
        .run(&args.source, &args.target, &options, ctx)?;

    info!(
        "{}{} new, {} changed, {} deleted, {} copied",
        if args.dry_run { "Dry run: " } else { "" },
        format!("{}", outcome.new_files).green(),
        format!("{}", outcome.changed_files).yellow(),
        format!("{}", outcome.deleted_files).red(),
        HumanBytes(outcome.copied_bytes),
    );
    report_failures(&outcome.failures);
    Ok(())
}

fn print_files(files: &[LocatedFile]) {
    for file in files {
        println!("    {}", file.file_path().display());
    }
}

fn report_failures(failures: &[String]) {
    if failures.is_empty() {
        return;
    }
    warn!("{} files failed:", format!("{}", failures.len()).red());
    for failure in failures {
        warn!("    {}", failure);
    }
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
