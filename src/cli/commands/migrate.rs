//! Ledger migration between backends.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use silverledger::ledger::{open_backend, LedgerMigrator, LedgerTable};
use silverledger::repository::redact_url_password;
use silverledger::repository::util::is_postgres_url;
use silverledger::{LedgerConfig, Settings};

/// Ledger settings for a database given on the command line.
fn ledger_config(settings: &Settings, location: &str) -> LedgerConfig {
    let base = if is_postgres_url(location) {
        LedgerConfig::client_server(location)
    } else {
        LedgerConfig::embedded(location)
    };
    LedgerConfig {
        max_connections: settings.ledger.max_connections,
        min_connections: settings.ledger.min_connections,
        acquire_timeout_secs: settings.ledger.acquire_timeout_secs,
        statement_timeout_ms: settings.ledger.statement_timeout_ms,
        busy_timeout_ms: settings.ledger.busy_timeout_ms,
        no_tls: settings.ledger.no_tls,
        ..base
    }
}

/// Create a progress bar for a table copy.
fn create_progress_bar(total: u64, table_name: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {prefix:>16} [{bar:40.cyan/dim}] {pos}/{len} ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(table_name.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub async fn cmd_migrate(
    settings: &Settings,
    from: &str,
    to: &str,
    batch_size: usize,
    dry_run: bool,
) -> anyhow::Result<()> {
    println!("{} Ledger migration", style("→").cyan());
    println!("  From: {}", redact_url_password(from));
    println!("  To:   {}", redact_url_password(to));

    let source = open_backend(&ledger_config(settings, from)).await?;
    let target = open_backend(&ledger_config(settings, to)).await?;

    let bars: Mutex<HashMap<&'static str, ProgressBar>> = Mutex::new(HashMap::new());
    let migrator = LedgerMigrator::new(source.as_ref(), target.as_ref())
        .with_batch_size(batch_size)
        .with_progress(Box::new(|table: LedgerTable, copied: u64, total: u64| {
            let Ok(mut bars) = bars.lock() else {
                return;
            };
            let pb = bars
                .entry(table.as_str())
                .or_insert_with(|| create_progress_bar(total, table.as_str()));
            pb.set_position(copied);
            if copied >= total {
                pb.finish();
            }
        }));

    let report = migrator.run(dry_run).await?;
    if let Ok(bars) = bars.lock() {
        for pb in bars.values() {
            pb.finish();
        }
    }

    println!();
    for table in &report.tables {
        if report.dry_run {
            println!(
                "  {:<16} {:>10} rows to copy ({} already in target)",
                table.table, table.source_rows, table.target_rows
            );
        } else {
            println!(
                "  {} {:<16} {:>10} copied, {} skipped, {} in target",
                style("✓").green(),
                table.table,
                table.copied,
                table.skipped,
                table.target_rows
            );
        }
    }
    if report.dry_run {
        println!("{} Dry run, nothing was copied", style("!").yellow());
    } else {
        println!(
            "{} Migrated {} rows, counts verified",
            style("✓").green(),
            report.total_copied()
        );
        if report.total_skipped() > 0 {
            println!(
                "{} {} rows already existed in the target and kept their target values",
                style("!").yellow(),
                report.total_skipped()
            );
        }
    }
    Ok(())
}
