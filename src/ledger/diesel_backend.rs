//! Diesel query bodies shared by both backends.
//!
//! The DSL is identical for SQLite and PostgreSQL; only the connection type differs.
//! `impl_ledger_backend!` expands the `LedgerBackend` impl for a type that has an
//! inherent `async fn connection(&self) -> LedgerResult<Conn>`.

/// States `record_failure` never overwrites.
pub(crate) const TERMINAL_STATES: [&str; 2] = ["processed", "duplicate"];

/// Deletes every Duplicate row that has a newer Duplicate with the same text hash.
/// Ties on `updated_at` fall back to the id, so exactly one row per hash survives.
pub(crate) const COMPACT_DUPLICATES_SQL: &str = "DELETE FROM ledger_entries \
WHERE state = 'duplicate' AND text_hash IS NOT NULL AND EXISTS (\
SELECT 1 FROM ledger_entries AS newer \
WHERE newer.state = 'duplicate' AND newer.text_hash = ledger_entries.text_hash \
AND (newer.updated_at > ledger_entries.updated_at \
OR (newer.updated_at = ledger_entries.updated_at AND newer.id > ledger_entries.id)))";

pub(crate) fn limit_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

macro_rules! impl_ledger_backend {
    ($backend:ty, $kind:expr) => {
        const _: () = {
            use chrono::{DateTime, NaiveDate, Utc};
            use diesel::prelude::*;
            use diesel::upsert::excluded;
            use diesel_async::RunQueryDsl;

            use $crate::ledger::backend::{
                BackendKind, EntryFilter, EntryOrder, LedgerBackend, LedgerTable, StateUpdate,
            };
            use $crate::ledger::diesel_backend::{
                limit_i64, COMPACT_DUPLICATES_SQL, TERMINAL_STATES,
            };
            use $crate::ledger::LedgerResult;
            use $crate::models::{
                encode_signature, DailyQuota, EntryState, FileChecksumRecord, LedgerEntry,
                RssFeedState,
            };
            use $crate::repository::diesel_models::{
                quota_date_key, DailyQuotaRecord, EncodedEntry, EntryChangeset, FileChecksumRow,
                LedgerEntryRecord, NewDailyQuota, NewFileChecksum, NewRssFeed, RssFeedRecord,
            };
            use $crate::repository::util::{date_key, now_timestamp, timestamp, to_i64, to_u64};
            use $crate::schema::{daily_quotas, file_checksums, ledger_entries, rss_feed_state};

            #[async_trait::async_trait]
            impl LedgerBackend for $backend {
                fn kind(&self) -> BackendKind {
                    $kind
                }

                fn describe(&self) -> String {
                    self.location()
                }

                async fn insert_url(&self, entry: &LedgerEntry) -> LedgerResult<bool> {
                    let encoded = EncodedEntry::new(entry)?;
                    let mut conn = self.connection().await?;
                    let rows = diesel::insert_into(ledger_entries::table)
                        .values(&encoded.insertable(entry))
                        .on_conflict((ledger_entries::source, ledger_entries::url))
                        .do_nothing()
                        .execute(&mut conn)
                        .await?;
                    Ok(rows > 0)
                }

                async fn get_url_state(
                    &self,
                    url: &str,
                    source: &str,
                ) -> LedgerResult<Option<LedgerEntry>> {
                    let mut conn = self.connection().await?;
                    let record = ledger_entries::table
                        .filter(ledger_entries::url.eq(url))
                        .filter(ledger_entries::source.eq(source))
                        .select(LedgerEntryRecord::as_select())
                        .first::<LedgerEntryRecord>(&mut conn)
                        .await
                        .optional()?;
                    Ok(record.map(LedgerEntry::from))
                }

                async fn get_urls_by_state(
                    &self,
                    filter: &EntryFilter<'_>,
                    order: EntryOrder,
                    limit: usize,
                ) -> LedgerResult<Vec<LedgerEntry>> {
                    let mut conn = self.connection().await?;
                    let mut query = ledger_entries::table
                        .select(LedgerEntryRecord::as_select())
                        .into_boxed();
                    if let Some(source) = filter.source {
                        query = query.filter(ledger_entries::source.eq(source));
                    }
                    if !filter.states.is_empty() {
                        let states: Vec<&str> =
                            filter.states.iter().map(EntryState::as_str).collect();
                        query = query.filter(ledger_entries::state.eq_any(states));
                    }
                    if let Some(since) = filter.updated_since {
                        query = query.filter(ledger_entries::updated_at.ge(timestamp(since)));
                    }
                    if let Some(since) = filter.processed_since {
                        query = query.filter(ledger_entries::processed_at.ge(timestamp(since)));
                    }
                    query = match order {
                        EntryOrder::OldestFirst => query.order(ledger_entries::id.asc()),
                        EntryOrder::RecentlyUpdated => query.order((
                            ledger_entries::updated_at.desc(),
                            ledger_entries::id.desc(),
                        )),
                    };

                    let records: Vec<LedgerEntryRecord> =
                        query.limit(limit_i64(limit)).load(&mut conn).await?;
                    Ok(records.into_iter().map(LedgerEntry::from).collect())
                }

                async fn count_urls(&self, filter: &EntryFilter<'_>) -> LedgerResult<u64> {
                    let mut conn = self.connection().await?;
                    let mut query = ledger_entries::table.into_boxed();
                    if let Some(source) = filter.source {
                        query = query.filter(ledger_entries::source.eq(source));
                    }
                    if !filter.states.is_empty() {
                        let states: Vec<&str> =
                            filter.states.iter().map(EntryState::as_str).collect();
                        query = query.filter(ledger_entries::state.eq_any(states));
                    }
                    if let Some(since) = filter.updated_since {
                        query = query.filter(ledger_entries::updated_at.ge(timestamp(since)));
                    }
                    if let Some(since) = filter.processed_since {
                        query = query.filter(ledger_entries::processed_at.ge(timestamp(since)));
                    }
                    let count: i64 = query.count().get_result(&mut conn).await?;
                    Ok(to_u64(count))
                }

                async fn mark_url_state(
                    &self,
                    url: &str,
                    source: &str,
                    update: &StateUpdate,
                ) -> LedgerResult<bool> {
                    let signature = update.minhash_signature.as_deref().map(encode_signature);
                    let metadata = update
                        .metadata
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?;
                    let fetch = update.fetch.as_ref();
                    let updated_at = now_timestamp();
                    let processed_at = update.processed_at.map(timestamp);
                    let (minhash_signature, silver_id) = if update.clear_outputs {
                        (Some(None), Some(None))
                    } else {
                        (
                            signature.as_deref().map(Some),
                            update.silver_id.as_deref().map(Some),
                        )
                    };

                    let changes = EntryChangeset {
                        state: update.state.as_str(),
                        text_hash: update.text_hash.as_deref(),
                        minhash_signature,
                        silver_id,
                        http_status: fetch.and_then(|f| f.http_status).map(i32::from),
                        etag: fetch.and_then(|f| f.etag.as_deref()),
                        last_modified: fetch.and_then(|f| f.last_modified.as_deref()),
                        content_length: fetch.and_then(|f| f.content_length).map(to_i64),
                        metadata: metadata.as_deref(),
                        updated_at: &updated_at,
                        processed_at: processed_at.as_deref(),
                    };

                    let mut conn = self.connection().await?;
                    let rows = diesel::update(
                        ledger_entries::table
                            .filter(ledger_entries::url.eq(url))
                            .filter(ledger_entries::source.eq(source)),
                    )
                    .set(&changes)
                    .execute(&mut conn)
                    .await?;
                    Ok(rows > 0)
                }

                async fn record_failure(
                    &self,
                    url: &str,
                    source: &str,
                    error_message: &str,
                ) -> LedgerResult<bool> {
                    let updated_at = now_timestamp();
                    let mut conn = self.connection().await?;
                    let rows = diesel::update(
                        ledger_entries::table
                            .filter(ledger_entries::url.eq(url))
                            .filter(ledger_entries::source.eq(source))
                            .filter(ledger_entries::state.ne_all(TERMINAL_STATES.to_vec())),
                    )
                    .set((
                        ledger_entries::state.eq(EntryState::Failed.as_str()),
                        ledger_entries::retry_count.eq(ledger_entries::retry_count + 1),
                        ledger_entries::error_message.eq(error_message),
                        ledger_entries::updated_at.eq(&updated_at),
                    ))
                    .execute(&mut conn)
                    .await?;
                    Ok(rows > 0)
                }

                async fn find_by_text_hash(
                    &self,
                    text_hash: &str,
                    limit: usize,
                ) -> LedgerResult<Vec<LedgerEntry>> {
                    let mut conn = self.connection().await?;
                    let records: Vec<LedgerEntryRecord> = ledger_entries::table
                        .filter(ledger_entries::text_hash.eq(text_hash))
                        .filter(ledger_entries::state.eq(EntryState::Processed.as_str()))
                        .order(ledger_entries::id.asc())
                        .limit(limit_i64(limit))
                        .select(LedgerEntryRecord::as_select())
                        .load(&mut conn)
                        .await?;
                    Ok(records.into_iter().map(LedgerEntry::from).collect())
                }

                async fn count_by_state(
                    &self,
                    source: Option<&str>,
                ) -> LedgerResult<Vec<(EntryState, u64)>> {
                    use diesel::dsl::count_star;

                    let mut conn = self.connection().await?;
                    let rows: Vec<(String, i64)> = match source {
                        Some(source) => {
                            ledger_entries::table
                                .filter(ledger_entries::source.eq(source))
                                .group_by(ledger_entries::state)
                                .select((ledger_entries::state, count_star()))
                                .load(&mut conn)
                                .await?
                        }
                        None => {
                            ledger_entries::table
                                .group_by(ledger_entries::state)
                                .select((ledger_entries::state, count_star()))
                                .load(&mut conn)
                                .await?
                        }
                    };
                    Ok(rows
                        .into_iter()
                        .filter_map(|(state, count)| {
                            EntryState::from_str(&state).map(|s| (s, to_u64(count)))
                        })
                        .collect())
                }

                async fn count_unique_documents(&self, source: Option<&str>) -> LedgerResult<u64> {
                    use diesel::dsl::count_distinct;

                    let mut conn = self.connection().await?;
                    let mut query = ledger_entries::table
                        .filter(ledger_entries::state.eq(EntryState::Processed.as_str()))
                        .select(count_distinct(ledger_entries::text_hash))
                        .into_boxed();
                    if let Some(source) = source {
                        query = query.filter(ledger_entries::source.eq(source));
                    }
                    let count: i64 = query.get_result(&mut conn).await?;
                    Ok(to_u64(count))
                }

                async fn last_updated_at(
                    &self,
                    source: &str,
                    state: EntryState,
                ) -> LedgerResult<Option<DateTime<Utc>>> {
                    use diesel::dsl::max;

                    let mut conn = self.connection().await?;
                    let latest: Option<String> = ledger_entries::table
                        .filter(ledger_entries::source.eq(source))
                        .filter(ledger_entries::state.eq(state.as_str()))
                        .select(max(ledger_entries::updated_at))
                        .get_result(&mut conn)
                        .await?;
                    Ok(latest.as_deref().map($crate::repository::util::parse_datetime))
                }

                async fn compact_duplicates(&self) -> LedgerResult<u64> {
                    let mut conn = self.connection().await?;
                    let rows = diesel::sql_query(COMPACT_DUPLICATES_SQL)
                        .execute(&mut conn)
                        .await?;
                    Ok(rows as u64)
                }

                async fn delete_failed_before(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
                    let mut conn = self.connection().await?;
                    let rows = diesel::delete(
                        ledger_entries::table
                            .filter(ledger_entries::state.eq(EntryState::Failed.as_str()))
                            .filter(ledger_entries::updated_at.lt(timestamp(cutoff))),
                    )
                    .execute(&mut conn)
                    .await?;
                    Ok(rows as u64)
                }

                async fn get_quota(
                    &self,
                    date: NaiveDate,
                    source: &str,
                ) -> LedgerResult<Option<DailyQuota>> {
                    let mut conn = self.connection().await?;
                    let record = daily_quotas::table
                        .filter(daily_quotas::quota_date.eq(date_key(date)))
                        .filter(daily_quotas::source.eq(source))
                        .select(DailyQuotaRecord::as_select())
                        .first::<DailyQuotaRecord>(&mut conn)
                        .await
                        .optional()?;
                    Ok(record.and_then(DailyQuotaRecord::into_quota))
                }

                async fn upsert_quota(&self, quota: &DailyQuota) -> LedgerResult<()> {
                    let date = quota_date_key(quota);
                    let updated_at = timestamp(quota.updated_at);
                    let row = NewDailyQuota::from_quota(quota, &date, &updated_at);

                    let mut conn = self.connection().await?;
                    diesel::insert_into(daily_quotas::table)
                        .values(&row)
                        .on_conflict((daily_quotas::quota_date, daily_quotas::source))
                        .do_update()
                        .set((
                            daily_quotas::records_ingested
                                .eq(excluded(daily_quotas::records_ingested)),
                            daily_quotas::quota_limit.eq(excluded(daily_quotas::quota_limit)),
                            daily_quotas::items_remaining
                                .eq(excluded(daily_quotas::items_remaining)),
                            daily_quotas::quota_hit.eq(excluded(daily_quotas::quota_hit)),
                            daily_quotas::updated_at.eq(excluded(daily_quotas::updated_at)),
                        ))
                        .execute(&mut conn)
                        .await?;
                    Ok(())
                }

                async fn get_quota_history(
                    &self,
                    source: &str,
                    limit: usize,
                ) -> LedgerResult<Vec<DailyQuota>> {
                    let mut conn = self.connection().await?;
                    let records: Vec<DailyQuotaRecord> = daily_quotas::table
                        .filter(daily_quotas::source.eq(source))
                        .order(daily_quotas::quota_date.desc())
                        .limit(limit_i64(limit))
                        .select(DailyQuotaRecord::as_select())
                        .load(&mut conn)
                        .await?;
                    Ok(records
                        .into_iter()
                        .filter_map(DailyQuotaRecord::into_quota)
                        .collect())
                }

                async fn delete_quotas_before(&self, date: NaiveDate) -> LedgerResult<u64> {
                    let mut conn = self.connection().await?;
                    let rows = diesel::delete(
                        daily_quotas::table.filter(daily_quotas::quota_date.lt(date_key(date))),
                    )
                    .execute(&mut conn)
                    .await?;
                    Ok(rows as u64)
                }

                async fn get_feed_state(
                    &self,
                    feed_url: &str,
                ) -> LedgerResult<Option<RssFeedState>> {
                    let mut conn = self.connection().await?;
                    let record = rss_feed_state::table
                        .filter(rss_feed_state::feed_url.eq(feed_url))
                        .select(RssFeedRecord::as_select())
                        .first::<RssFeedRecord>(&mut conn)
                        .await
                        .optional()?;
                    Ok(record.map(RssFeedState::from))
                }

                async fn upsert_feed_state(&self, state: &RssFeedState) -> LedgerResult<()> {
                    let last_fetch_time = timestamp(state.last_fetch_time);
                    let row = NewRssFeed {
                        feed_url: &state.feed_url,
                        last_fetch_time: &last_fetch_time,
                        items_found: to_i64(state.items_found),
                    };

                    let mut conn = self.connection().await?;
                    diesel::insert_into(rss_feed_state::table)
                        .values(&row)
                        .on_conflict(rss_feed_state::feed_url)
                        .do_update()
                        .set((
                            rss_feed_state::last_fetch_time
                                .eq(excluded(rss_feed_state::last_fetch_time)),
                            rss_feed_state::items_found.eq(excluded(rss_feed_state::items_found)),
                        ))
                        .execute(&mut conn)
                        .await?;
                    Ok(())
                }

                async fn get_file_checksum(
                    &self,
                    checksum: &str,
                    source: &str,
                ) -> LedgerResult<Option<FileChecksumRecord>> {
                    let mut conn = self.connection().await?;
                    let row = file_checksums::table
                        .filter(file_checksums::checksum.eq(checksum))
                        .filter(file_checksums::source.eq(source))
                        .select(FileChecksumRow::as_select())
                        .first::<FileChecksumRow>(&mut conn)
                        .await
                        .optional()?;
                    Ok(row.map(FileChecksumRecord::from))
                }

                async fn record_file_checksum(
                    &self,
                    record: &FileChecksumRecord,
                ) -> LedgerResult<bool> {
                    let processed_at = timestamp(record.processed_at);
                    let mut conn = self.connection().await?;
                    let rows = diesel::insert_into(file_checksums::table)
                        .values(&NewFileChecksum::from_record(record, &processed_at))
                        .on_conflict((file_checksums::checksum, file_checksums::source))
                        .do_nothing()
                        .execute(&mut conn)
                        .await?;
                    Ok(rows > 0)
                }

                async fn count_rows(&self, table: LedgerTable) -> LedgerResult<u64> {
                    let mut conn = self.connection().await?;
                    let count: i64 = match table {
                        LedgerTable::Entries => {
                            ledger_entries::table.count().get_result(&mut conn).await?
                        }
                        LedgerTable::Quotas => {
                            daily_quotas::table.count().get_result(&mut conn).await?
                        }
                        LedgerTable::Feeds => {
                            rss_feed_state::table.count().get_result(&mut conn).await?
                        }
                        LedgerTable::FileChecksums => {
                            file_checksums::table.count().get_result(&mut conn).await?
                        }
                    };
                    Ok(to_u64(count))
                }

                async fn export_entries(
                    &self,
                    after_id: i64,
                    limit: usize,
                ) -> LedgerResult<Vec<LedgerEntry>> {
                    let after_id = i32::try_from(after_id).unwrap_or(i32::MAX);
                    let mut conn = self.connection().await?;
                    let records: Vec<LedgerEntryRecord> = ledger_entries::table
                        .filter(ledger_entries::id.gt(after_id))
                        .order(ledger_entries::id.asc())
                        .limit(limit_i64(limit))
                        .select(LedgerEntryRecord::as_select())
                        .load(&mut conn)
                        .await?;
                    Ok(records.into_iter().map(LedgerEntry::from).collect())
                }

                async fn export_quotas(
                    &self,
                    offset: u64,
                    limit: usize,
                ) -> LedgerResult<Vec<DailyQuota>> {
                    let mut conn = self.connection().await?;
                    let records: Vec<DailyQuotaRecord> = daily_quotas::table
                        .order((daily_quotas::quota_date.asc(), daily_quotas::source.asc()))
                        .offset(to_i64(offset))
                        .limit(limit_i64(limit))
                        .select(DailyQuotaRecord::as_select())
                        .load(&mut conn)
                        .await?;
                    Ok(records
                        .into_iter()
                        .filter_map(DailyQuotaRecord::into_quota)
                        .collect())
                }

                async fn export_feeds(
                    &self,
                    offset: u64,
                    limit: usize,
                ) -> LedgerResult<Vec<RssFeedState>> {
                    let mut conn = self.connection().await?;
                    let records: Vec<RssFeedRecord> = rss_feed_state::table
                        .order(rss_feed_state::feed_url.asc())
                        .offset(to_i64(offset))
                        .limit(limit_i64(limit))
                        .select(RssFeedRecord::as_select())
                        .load(&mut conn)
                        .await?;
                    Ok(records.into_iter().map(RssFeedState::from).collect())
                }

                async fn export_file_checksums(
                    &self,
                    offset: u64,
                    limit: usize,
                ) -> LedgerResult<Vec<FileChecksumRecord>> {
                    let mut conn = self.connection().await?;
                    let rows: Vec<FileChecksumRow> = file_checksums::table
                        .order((file_checksums::checksum.asc(), file_checksums::source.asc()))
                        .offset(to_i64(offset))
                        .limit(limit_i64(limit))
                        .select(FileChecksumRow::as_select())
                        .load(&mut conn)
                        .await?;
                    Ok(rows.into_iter().map(FileChecksumRecord::from).collect())
                }

                async fn import_entries(&self, entries: &[LedgerEntry]) -> LedgerResult<usize> {
                    let mut conn = self.connection().await?;
                    let mut written = 0;
                    for entry in entries {
                        let encoded = EncodedEntry::new(entry)?;
                        written += diesel::insert_into(ledger_entries::table)
                            .values(&encoded.insertable(entry))
                            .on_conflict((ledger_entries::source, ledger_entries::url))
                            .do_nothing()
                            .execute(&mut conn)
                            .await?;
                    }
                    Ok(written)
                }

                async fn import_quotas(&self, quotas: &[DailyQuota]) -> LedgerResult<usize> {
                    let mut conn = self.connection().await?;
                    let mut written = 0;
                    for quota in quotas {
                        let date = quota_date_key(quota);
                        let updated_at = timestamp(quota.updated_at);
                        written += diesel::insert_into(daily_quotas::table)
                            .values(&NewDailyQuota::from_quota(quota, &date, &updated_at))
                            .on_conflict((daily_quotas::quota_date, daily_quotas::source))
                            .do_nothing()
                            .execute(&mut conn)
                            .await?;
                    }
                    Ok(written)
                }

                async fn import_feeds(&self, feeds: &[RssFeedState]) -> LedgerResult<usize> {
                    let mut conn = self.connection().await?;
                    let mut written = 0;
                    for feed in feeds {
                        let last_fetch_time = timestamp(feed.last_fetch_time);
                        written += diesel::insert_into(rss_feed_state::table)
                            .values(&NewRssFeed {
                                feed_url: &feed.feed_url,
                                last_fetch_time: &last_fetch_time,
                                items_found: to_i64(feed.items_found),
                            })
                            .on_conflict(rss_feed_state::feed_url)
                            .do_nothing()
                            .execute(&mut conn)
                            .await?;
                    }
                    Ok(written)
                }

                async fn import_file_checksums(
                    &self,
                    records: &[FileChecksumRecord],
                ) -> LedgerResult<usize> {
                    let mut conn = self.connection().await?;
                    let mut written = 0;
                    for record in records {
                        let processed_at = timestamp(record.processed_at);
                        written += diesel::insert_into(file_checksums::table)
                            .values(&NewFileChecksum::from_record(record, &processed_at))
                            .on_conflict((file_checksums::checksum, file_checksums::source))
                            .do_nothing()
                            .execute(&mut conn)
                            .await?;
                    }
                    Ok(written)
                }
            }
        };
    };
}

pub(crate) use impl_ledger_backend;
