//! Lock and checkpoint inspection commands.

use std::path::Path;

use console::style;

use silverledger::checkpoint::read_checkpoint;
use silverledger::{LockManager, Settings};

pub fn cmd_locks_status(settings: &Settings) -> anyhow::Result<()> {
    let locks = LockManager::new(&settings.locks);
    let held = locks.list_locks()?;

    if held.is_empty() {
        println!("{} No source locks held in {}", style("✓").green(), locks.dir().display());
        return Ok(());
    }

    let stale_after = settings.locks.stale_after_hours * 3600;
    for lock in held {
        let age_hours = lock.age.as_secs() / 3600;
        let holder = match lock.info {
            Some(ref info) => format!("pid {} on {}", info.pid, info.host),
            None => "unreadable lock file".to_string(),
        };
        let line = format!("{:<24} {:<32} {:>4}h", lock.source(), holder, age_hours);
        if lock.age.as_secs() >= stale_after {
            println!("  {} {} (stale)", style("!").yellow(), line);
        } else {
            println!("  {} {}", style("●").cyan(), line);
        }
    }
    Ok(())
}

pub fn cmd_locks_cleanup(settings: &Settings, max_age_hours: Option<u64>) -> anyhow::Result<()> {
    let locks = LockManager::new(&settings.locks);
    let max_age = max_age_hours.unwrap_or(settings.locks.stale_after_hours);
    let freed = locks.cleanup_stale_locks(max_age)?;

    if freed.is_empty() {
        println!("{} No locks older than {}h", style("✓").green(), max_age);
    } else {
        for source in &freed {
            println!("  {} Removed stale lock: {}", style("✓").green(), source);
        }
    }
    Ok(())
}

pub fn cmd_checkpoint_show(path: &Path) -> anyhow::Result<()> {
    match read_checkpoint(path) {
        Some(checkpoint) => {
            println!("{} {}", style("→").cyan(), path.display());
            println!("  Run:        {}", checkpoint.run_id);
            println!("  Resume at:  record {}", checkpoint.last_index);
            println!("  Written:    {}", checkpoint.timestamp.to_rfc3339());
        }
        None => println!(
            "{} No usable checkpoint at {} (a run would start from 0)",
            style("!").yellow(),
            path.display()
        ),
    }
    Ok(())
}
