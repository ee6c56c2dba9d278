//! Ledger inspection and maintenance commands.

use console::style;

use silverledger::models::EntryState;
use silverledger::{CrawlLedger, Settings};

/// Print per-state counts and the dedup rate.
pub async fn cmd_stats(settings: &Settings, source: Option<&str>) -> anyhow::Result<()> {
    let ledger = CrawlLedger::connect(&settings.ledger).await?;
    let stats = ledger.get_statistics(source).await?;

    match source {
        Some(source) => println!("{} Ledger statistics for '{}'", style("→").cyan(), source),
        None => println!("{} Ledger statistics", style("→").cyan()),
    }
    println!("  {:<18} {:>10}", "total urls", stats.total_urls);
    for state in EntryState::ALL {
        let count = stats.count(state);
        let label = format!("{:<18} {:>10}", state.as_str(), count);
        match state {
            EntryState::Failed if count > 0 => println!("  {}", style(label).yellow()),
            _ => println!("  {}", label),
        }
    }
    println!("  {:<18} {:>10}", "unique documents", stats.unique_documents);
    println!("  {:<18} {:>9.1}%", "dedup rate", stats.dedup_rate * 100.0);

    if let Some(source) = source {
        let quota = ledger.check_quota_available(source).await?;
        match quota.limit {
            Some(limit) => println!(
                "  {:<18} {:>10} of {} ({})",
                "quota today",
                quota.ingested,
                limit,
                if quota.available {
                    style("available").green()
                } else {
                    style("exhausted").red()
                }
            ),
            None => println!("  {:<18} {:>10} (no limit)", "ingested today", quota.ingested),
        }
        if let Some(last) = ledger.get_last_processing_time(source).await? {
            println!("  {:<18} {}", "last processed", last.to_rfc3339());
        }
    }

    Ok(())
}

pub async fn cmd_compact(settings: &Settings) -> anyhow::Result<()> {
    let ledger = CrawlLedger::connect(&settings.ledger).await?;
    let compacted = ledger.compact_duplicates().await?;
    println!(
        "{} Removed {} redundant duplicate entries",
        style("✓").green(),
        compacted
    );
    Ok(())
}

pub async fn cmd_cleanup(
    settings: &Settings,
    failed_older_than_days: i64,
    quota_older_than_days: i64,
) -> anyhow::Result<()> {
    if failed_older_than_days < 0 || quota_older_than_days < 0 {
        anyhow::bail!("retention periods must not be negative");
    }
    let ledger = CrawlLedger::connect(&settings.ledger).await?;

    let failed = ledger
        .cleanup_failed(chrono::Duration::days(failed_older_than_days))
        .await?;
    let quotas = ledger
        .cleanup_quotas(chrono::Duration::days(quota_older_than_days))
        .await?;

    println!(
        "{} Removed {} failed entries older than {} days",
        style("✓").green(),
        failed,
        failed_older_than_days
    );
    println!(
        "{} Removed {} quota rows older than {} days",
        style("✓").green(),
        quotas,
        quota_older_than_days
    );
    Ok(())
}
