//! The dredge command line: wires indexers, the target frontier, and
//! scanners into one binary.

mod args;

use anyhow::{Context, Result};
use args::Cli;
use chrono::Local;
use clap::{CommandFactory, Parser};
use dredge_core::config::AppConfig;
use dredge_core::report::{write_report, Report, ReportOptions};
use dredge_core::ModuleArgs;
use dredge_db::{Blocklist, DequeueOptions, ListOptions, PruneOptions, StoreOptions, TargetStore};
use dredge_indexers::IndexerRegistry;
use dredge_scanners::{ScanOutcome, ScannerRegistry};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    if !cli.has_work() {
        Cli::command().print_help()?;
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    std::fs::create_dir_all(&cli.directory).context("failed to create dredge directory")?;

    let retries = cli.retries.unwrap_or(config.retries);
    let mut retry_on = config.retry_on.clone();
    retry_on.extend(cli.retry_on.iter().cloned());

    let database = store_address(&cli, &config);
    let store = TargetStore::open(
        &database,
        &StoreOptions {
            drop_tables: cli.drop_tables,
            retries,
            retry_on: retry_on.clone(),
        },
    )
    .await
    .context("failed to load database")?;

    let mut internal = Blocklist::open(&database, retries, retry_on.clone())
        .await
        .context("failed to load blocklist")?;

    if cli.flush_blocklist {
        internal.flush().await?;
    }
    if let Some(item) = &cli.add_blocklist_item {
        internal.add(item).await?;
    }
    if let Some(item) = &cli.delete_blocklist_item {
        internal.delete(item).await?;
    }

    let mut blocklists = vec![internal];
    for address in &cli.external_blocklist {
        let external = Blocklist::open(address, retries, retry_on.clone())
            .await
            .with_context(|| format!("failed to load blocklist {address}"))?;
        blocklists.push(external);
    }

    if cli.list_blocklist {
        for blocklist in &blocklists {
            for item in blocklist.items() {
                println!("{item}");
            }
        }
    }

    if cli.flush_fingerprints {
        store.flush_fingerprints().await?;
    }
    if cli.reset_scanned {
        store.reset_scanned().await?;
    }
    if cli.flush_targets {
        store.flush_targets().await?;
    }
    if let Some(url) = &cli.add_target {
        store
            .add_target(url, cli.source.as_deref(), &blocklists)
            .await?;
    }
    if let Some(url) = &cli.delete_target {
        store.delete_target(url).await?;
    }
    if let Some(url) = &cli.mark_unscanned {
        store.mark_unscanned(url).await?;
    }

    if let Some(name) = &cli.indexer {
        index(&cli, &store, &blocklists, name).await?;
    }

    if cli.generate_fingerprints {
        store.generate_fingerprints(cli.source.as_deref()).await?;
    }

    if cli.prune {
        store
            .prune(
                &blocklists,
                &PruneOptions {
                    source: cli.source.clone(),
                    random: cli.random,
                    count: cli.count,
                    fingerprint_max: cli.fingerprint_max,
                    delete_on_error: cli.delete_on_error,
                },
            )
            .await?;
    }

    if let Some(name) = &cli.scanner {
        scan(&cli, &config, &store, &blocklists, name).await?;
    }

    if cli.list_targets {
        let rows = store.get_urls(&list_options(&cli)).await?;
        for row in rows {
            match row.source {
                Some(source) => println!("{} | {}", row.url, source),
                None => println!("{}", row.url),
            }
        }
    }

    if cli.list_sources {
        for source in store.get_sources().await? {
            println!("{source}");
        }
    }

    if cli.show_stats {
        let total = store.target_count(&ListOptions::default()).await?;
        let unscanned = store
            .target_count(&ListOptions {
                unscanned_only: true,
                ..ListOptions::default()
            })
            .await?;
        let fingerprints = store.fingerprint_count().await?;
        println!("targets: {total}\nunscanned: {unscanned}\nfingerprints: {fingerprints}");
    }

    Ok(())
}

/// Resolve the store address: flag wins over config file, falling back to a
/// SQLite file inside the dredge directory. Bare paths get the sqlite3
/// scheme so the internal blocklist shares the same store.
fn store_address(cli: &Cli, config: &AppConfig) -> String {
    let address = cli
        .database
        .clone()
        .or_else(|| config.database.clone())
        .unwrap_or_else(|| cli.directory.join("dredge.db").display().to_string());
    if address.contains("://") {
        address
    } else {
        format!("sqlite3://{address}")
    }
}

fn list_options(cli: &Cli) -> ListOptions {
    ListOptions {
        unscanned_only: cli.unscanned_only,
        source: cli.source.clone(),
        with_source: cli.show_sources,
        random: cli.random,
        count: cli.count,
    }
}

async fn index(cli: &Cli, store: &TargetStore, blocklists: &[Blocklist], name: &str) -> Result<()> {
    let registry = IndexerRegistry::with_builtins();
    let module_args = ModuleArgs::parse(&cli.indexer_arg);
    let indexer = registry.build(name, &module_args)?;

    tracing::info!(indexer = name, "indexing");
    let batch = indexer.run().await?;
    let source = cli.source.clone().unwrap_or(batch.source);
    store
        .add_targets(&batch.urls, Some(&source), blocklists)
        .await?;
    Ok(())
}

async fn scan(
    cli: &Cli,
    config: &AppConfig,
    store: &TargetStore,
    blocklists: &[Blocklist],
    name: &str,
) -> Result<()> {
    let registry = ScannerRegistry::with_builtins();
    let module_args = ModuleArgs::parse(&cli.scanner_arg);
    let scanner = registry.build(name, &module_args)?;
    let label = module_args.get_or("label", "");
    let report_options = report_options(cli, config, &module_args)?;

    // Operator interrupts are honored between dequeues; an in-flight
    // scanner invocation is not preempted.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let dequeue = DequeueOptions {
        source: cli.source.clone(),
        random: cli.random,
        test: cli.test,
        delete_on_error: cli.delete_on_error,
    };

    let mut scanned = 0u64;
    while cli.count == 0 || scanned < cli.count {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!("interrupted, stopping scan loop");
            break;
        }
        if cli.test && scanned > 0 {
            break;
        }
        let Some(target) = store.get_next_target(blocklists, &dequeue).await? else {
            break;
        };

        tracing::info!(url = target.url(), scanner = name, "scanning");
        let starttime = Local::now().to_rfc3339();
        let outcome = scanner.scan(&target).await;
        let endtime = Local::now().to_rfc3339();
        scanned += 1;

        match outcome {
            ScanOutcome::Failed => {
                tracing::error!(url = target.url(), "scan failed");
            }
            ScanOutcome::Completed(vulnerabilities) => {
                let report = Report {
                    endtime,
                    label: label.clone(),
                    starttime,
                    url: target.url().to_string(),
                    vulnerabilities,
                };
                write_report(&report, &report_options, Some(target.hash()))?;
            }
        }
    }
    Ok(())
}

/// Report options come in as scanner module arguments, with the config file
/// and the dredge directory supplying the directory default.
fn report_options(cli: &Cli, config: &AppConfig, module_args: &ModuleArgs) -> Result<ReportOptions> {
    let default_dir = config.report_dir.as_ref().map_or_else(
        || cli.directory.join("reports").display().to_string(),
        |dir| dir.display().to_string(),
    );
    let dir = module_args.get_or("report-dir", &default_dir);
    let indent = module_args.get_parsed("report-indent", 4usize)?;
    Ok(ReportOptions {
        dir: PathBuf::from(dir),
        filename: module_args.get("report-filename").map(str::to_string),
        append: module_args.flag("report-append"),
        indent: Some(indent),
    })
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &cli.log {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).context("failed to create log directory")?;
                }
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("failed to open log file")?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
