// Kept in sync by hand with the cetane migrations in src/migrations.

diesel::table! {
    ledger_entries (id) {
        id -> Integer,
        url -> Text,
        source -> Text,
        state -> Text,
        text_hash -> Nullable<Text>,
        minhash_signature -> Nullable<Text>,
        silver_id -> Nullable<Text>,
        http_status -> Nullable<Integer>,
        etag -> Nullable<Text>,
        last_modified -> Nullable<Text>,
        content_length -> Nullable<BigInt>,
        error_message -> Nullable<Text>,
        retry_count -> Integer,
        metadata -> Text,
        created_at -> Text,
        updated_at -> Text,
        processed_at -> Nullable<Text>,
    }
}

diesel::table! {
    daily_quotas (quota_date, source) {
        quota_date -> Text,
        source -> Text,
        records_ingested -> BigInt,
        quota_limit -> Nullable<BigInt>,
        items_remaining -> Nullable<BigInt>,
        quota_hit -> Integer,
        updated_at -> Text,
    }
}

diesel::table! {
    rss_feed_state (feed_url) {
        feed_url -> Text,
        last_fetch_time -> Text,
        items_found -> BigInt,
    }
}

diesel::table! {
    file_checksums (checksum, source) {
        checksum -> Text,
        source -> Text,
        file_path -> Text,
        record_count -> BigInt,
        processed_at -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    ledger_entries,
    daily_quotas,
    rss_feed_state,
    file_checksums,
);
