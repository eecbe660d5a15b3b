//! Daily purge of old records.
//!
//! Age is measured from `created_at`, not from the record's day: a
//! backfilled record lives for the full horizon after it was entered.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Months, NaiveTime, Utc};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::Retention;
use crate::record::RecordStore;

/// Instant before which records are expired.
pub fn cutoff(now: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Next run strictly after `now`, at `hour`:00 UTC.
pub fn next_run(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or_default();
    let today = now.date_naive().and_time(at).and_utc();
    if today > now {
        today
    } else {
        today.checked_add_days(Days::new(1)).unwrap_or(today)
    }
}

/// Delete expired records once. Failures are logged, never returned: the
/// next scheduled run retries.
pub async fn sweep(store: &dyn RecordStore, clock: &dyn Clock, months: u32) -> u64 {
    let cutoff = cutoff(clock.now(), months);
    match store.delete_created_before(cutoff).await {
        Ok(deleted) => {
            metrics::counter!("milk_records_swept_total").increment(deleted);
            tracing::info!(deleted, %cutoff, "old milk records deleted");
            deleted
        },
        Err(err) => {
            tracing::error!(error = %err, %cutoff, "retention sweep failed");
            0
        },
    }
}

/// Run [`sweep`] every day at the configured hour.
pub fn spawn(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, config: Retention) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = clock.now();
            let next = next_run(now, config.hour);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(%next, "next retention sweep scheduled");

            tokio::time::sleep(wait).await;
            sweep(store.as_ref(), clock.as_ref(), config.months).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::record::{DateRange, MemoryRecordStore, MilkRecord, Order};

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_next_run() {
        assert_eq!(next_run(at("2024-03-15T01:00:00Z"), 2), at("2024-03-15T02:00:00Z"));
        assert_eq!(next_run(at("2024-03-15T02:00:00Z"), 2), at("2024-03-16T02:00:00Z"));
        assert_eq!(next_run(at("2024-12-31T23:30:00Z"), 2), at("2025-01-01T02:00:00Z"));
    }

    #[test]
    fn test_cutoff_is_calendar_months() {
        assert_eq!(cutoff(at("2024-08-31T02:00:00Z"), 6), at("2024-02-29T02:00:00Z"));
    }

    #[tokio::test]
    async fn test_sweep_uses_creation_time() {
        let store = MemoryRecordStore::new();
        let clock = FixedClock::at("2024-09-15T02:00:00Z");
        let user = uuid::Uuid::new_v4();
        let day = |d| chrono::NaiveDate::from_ymd_opt(2024, 9, d).unwrap();

        // Recent day, entered long ago.
        let old = MilkRecord::auto_marked(user, day(1), at("2024-03-15T01:59:59Z"));
        // Just inside the horizon.
        let edge = MilkRecord::auto_marked(user, day(2), at("2024-03-15T02:00:00Z"));
        // Old day, backfilled recently.
        let mut backfilled = MilkRecord::auto_marked(user, day(3), at("2024-09-10T00:00:00Z"));
        backfilled.date = chrono::NaiveDate::from_ymd_opt(2023, 10, 1).unwrap();

        for record in [&old, &edge, &backfilled] {
            store.insert(record).await.unwrap();
        }

        assert_eq!(sweep(&store, &clock, 6).await, 1);

        let left = store
            .find_range(user, DateRange::default(), Order::Ascending, None)
            .await
            .unwrap();
        let ids: Vec<_> = left.iter().map(|r| r.id).collect();
        assert_eq!(ids, [backfilled.id, edge.id]);
    }
}
