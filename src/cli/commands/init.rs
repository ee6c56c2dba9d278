//! Initialize command.

use console::style;

use silverledger::ledger::BackendKind;
use silverledger::repository::{redact_url_password, run_migrations};
use silverledger::{CrawlLedger, Settings};

/// Create the data directories and bring the ledger schema up to date.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;

    let ledger_config = &settings.ledger;
    let url = match BackendKind::parse(&ledger_config.backend)? {
        BackendKind::ClientServer => ledger_config
            .database_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("client-server ledger requires DATABASE_URL"))?,
        BackendKind::Embedded => ledger_config.sqlite_url(),
    };
    let applied = run_migrations(&url, ledger_config.no_tls).await?;
    if applied.is_empty() {
        println!("  {} Schema already up to date", style("✓").green());
    } else {
        for name in &applied {
            println!("  {} Applied migration: {}", style("✓").green(), name);
        }
    }

    // Opening the ledger also checks the backend setting and connectivity.
    let ledger = CrawlLedger::connect(ledger_config).await?;
    println!(
        "{} Initialized {} ledger at {}",
        style("✓").green(),
        ledger.backend().kind().as_str(),
        redact_url_password(&url)
    );
    println!("  Data directory: {}", settings.data_dir.display());
    println!("  Checkpoints:    {}", settings.checkpoint.dir.display());
    println!("  Locks:          {}", settings.locks.dir.display());

    Ok(())
}
