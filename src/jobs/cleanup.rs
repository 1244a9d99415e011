//! Background job: storage hygiene for bookmarklet tokens.
//!
//! Runs hourly. Deletes token rows whose expiry is more than 30 days in the
//! past and sweeps locally-expired cache entries. Token validity is always
//! decided at read time (`expires_at` / `usage_count` comparison), so this
//! job can never change the outcome of a validate call — it only bounds
//! table and cache growth.

use chrono::Duration as ChronoDuration;
use std::time::Duration;
use tokio::time;

use crate::cache::TieredCache;
use crate::store::postgres::PgStore;

/// How far past expiry a token row must be before it is purged.
const PURGE_AFTER_DAYS: i64 = 30;

/// Spawn the background cleanup task. Call this once at startup.
pub fn spawn(db: PgStore, cache: TieredCache) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(3600)); // every hour
        loop {
            interval.tick().await;

            match db
                .purge_expired_tokens(ChronoDuration::days(PURGE_AFTER_DAYS))
                .await
            {
                Ok(0) => {}
                Ok(purged) => {
                    tracing::info!(rows = purged, "purged long-expired bookmarklet tokens");
                }
                Err(e) => {
                    tracing::error!("token purge failed: {}", e);
                }
            }

            let evicted = cache.evict_expired();
            if evicted > 0 {
                tracing::debug!(entries = evicted, "evicted expired local cache entries");
            }
        }
    });
}
