mod m0001_ledger_entries;
mod m0002_quotas_and_feeds;
mod m0003_file_checksums;
mod m0004_processed_at;

use cetane::prelude::MigrationRegistry;

pub fn registry() -> MigrationRegistry {
    let mut reg = MigrationRegistry::new();
    reg.register(m0001_ledger_entries::migration());
    reg.register(m0002_quotas_and_feeds::migration());
    reg.register(m0003_file_checksums::migration());
    reg.register(m0004_processed_at::migration());
    reg
}
