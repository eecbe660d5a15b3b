//! Handle record persistence.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Executor, Pool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::StoreError;
use crate::record::{DateRange, MilkRecord, RecordPatch};
use crate::stats::{RangeStatistics, RangeSummary};

pub type Result<T> = std::result::Result<T, StoreError>;

pub const USER_DATE_KEY: &str = "user_date";
const CONSTRAINTS: &[(&str, &'static str)] = &[("milk_records_user_date_key", USER_DATE_KEY)];

/// Sort order on record days.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Slice of a sorted result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub skip: u64,
    pub limit: u64,
}

/// Store-level result of inserting one entry of a batch.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertOutcome {
    Created(MilkRecord),
    Conflicted(NaiveDate),
}

/// Persistence of [`MilkRecord`], keyed uniquely by `(user_id, date)`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Find the record of `user_id` for `date`.
    async fn find_by_date(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<MilkRecord>>;

    /// Insert a new record. Fails with [`StoreError::Conflict`] when the day
    /// already has one.
    async fn insert(&self, record: &MilkRecord) -> Result<()>;

    /// Insert `record` unless its day exists; returns the stored record and
    /// whether it was created. Single atomic operation.
    async fn get_or_insert(&self, record: MilkRecord) -> Result<(MilkRecord, bool)>;

    /// Merge `patch` into the record of `user_id` for `date`. Returns `None`
    /// when there is no such record.
    async fn patch_by_date(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        patch: &RecordPatch,
        at: DateTime<Utc>,
    ) -> Result<Option<MilkRecord>>;

    /// Clear the auto-marked flag of a record owned by `user_id`.
    async fn confirm(&self, user_id: Uuid, id: Uuid, at: DateTime<Utc>) -> Result<Option<MilkRecord>>;

    /// Delete a record owned by `user_id`, returning it.
    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<Option<MilkRecord>>;

    /// Records of `user_id` within `range`.
    async fn find_range(
        &self,
        user_id: Uuid,
        range: DateRange,
        order: Order,
        window: Option<Window>,
    ) -> Result<Vec<MilkRecord>>;

    /// Count and totals of the records of `user_id` within `range`.
    async fn summarize(&self, user_id: Uuid, range: DateRange) -> Result<RangeSummary>;

    /// Insert every record of a batch; conflicts do not stop it. Either all
    /// outcomes are persisted or none is.
    async fn insert_many(&self, records: Vec<MilkRecord>) -> Result<Vec<InsertOutcome>>;

    /// Delete all records created strictly before `cutoff`.
    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    total: i64,
    total_liters: f64,
    average_liters: f64,
    received: i64,
    not_received: i64,
    partial: i64,
    auto_marked: i64,
}

const COLUMNS: &str =
    "id, user_id, date, liters, status, milk_type, notes, is_auto_marked, created_at, updated_at";

/// PostgreSQL-backed [`RecordStore`].
#[derive(Clone)]
pub struct PgRecordStore {
    pool: Pool<Postgres>,
}

impl PgRecordStore {
    /// Create a new [`PgRecordStore`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn insert_query(on_conflict_nothing: bool) -> String {
        format!(
            r#"INSERT INTO milk_records ({COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                {}
                RETURNING {COLUMNS}"#,
            if on_conflict_nothing {
                "ON CONFLICT (user_id, date) DO NOTHING"
            } else {
                ""
            }
        )
    }

    fn push_filter(query: &mut QueryBuilder<'_, Postgres>, user_id: Uuid, range: DateRange) {
        query.push(" WHERE user_id = ").push_bind(user_id);
        if let Some(start) = range.start {
            query.push(" AND date >= ").push_bind(start);
        }
        if let Some(end) = range.end {
            query.push(" AND date <= ").push_bind(end);
        }
    }

    async fn insert_returning<'e, E>(
        executor: E,
        record: &MilkRecord,
        on_conflict_nothing: bool,
    ) -> Result<Option<MilkRecord>>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, MilkRecord>(&Self::insert_query(on_conflict_nothing))
            .bind(record.id)
            .bind(record.user_id)
            .bind(record.date)
            .bind(record.liters)
            .bind(record.status.as_str())
            .bind(record.milk_type.as_str())
            .bind(&record.notes)
            .bind(record.is_auto_marked)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_optional(executor)
            .await
            .map_err(|err| StoreError::from_sql(err, CONSTRAINTS))
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn find_by_date(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<MilkRecord>> {
        Ok(sqlx::query_as::<_, MilkRecord>(&format!(
            "SELECT {COLUMNS} FROM milk_records WHERE user_id = $1 AND date = $2"
        ))
        .bind(user_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert(&self, record: &MilkRecord) -> Result<()> {
        Self::insert_returning(&self.pool, record, false).await?;
        Ok(())
    }

    async fn get_or_insert(&self, record: MilkRecord) -> Result<(MilkRecord, bool)> {
        // A delete may land between the insert and the lookup; the second
        // insert then takes the freed day.
        for _ in 0..2 {
            if let Some(created) = Self::insert_returning(&self.pool, &record, true).await? {
                return Ok((created, true));
            }
            if let Some(existing) = self.find_by_date(record.user_id, record.date).await? {
                return Ok((existing, false));
            }
            tracing::debug!(user_id = %record.user_id, date = %record.date, "day freed while reading it, retrying");
        }
        Err(StoreError::NotFound)
    }

    async fn patch_by_date(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        patch: &RecordPatch,
        at: DateTime<Utc>,
    ) -> Result<Option<MilkRecord>> {
        Ok(sqlx::query_as::<_, MilkRecord>(&format!(
            r#"UPDATE milk_records
                SET liters = COALESCE($3, liters),
                    status = COALESCE($4, status),
                    notes = COALESCE($5, notes),
                    milk_type = COALESCE($6, milk_type),
                    is_auto_marked = FALSE,
                    updated_at = $7
                WHERE user_id = $1 AND date = $2
                RETURNING {COLUMNS}"#
        ))
        .bind(user_id)
        .bind(date)
        .bind(patch.liters)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.notes.as_deref())
        .bind(patch.milk_type.map(|t| t.as_str()))
        .bind(at)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn confirm(&self, user_id: Uuid, id: Uuid, at: DateTime<Utc>) -> Result<Option<MilkRecord>> {
        Ok(sqlx::query_as::<_, MilkRecord>(&format!(
            r#"UPDATE milk_records SET is_auto_marked = FALSE, updated_at = $3
                WHERE id = $1 AND user_id = $2
                RETURNING {COLUMNS}"#
        ))
        .bind(id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<Option<MilkRecord>> {
        Ok(sqlx::query_as::<_, MilkRecord>(&format!(
            "DELETE FROM milk_records WHERE id = $1 AND user_id = $2 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_range(
        &self,
        user_id: Uuid,
        range: DateRange,
        order: Order,
        window: Option<Window>,
    ) -> Result<Vec<MilkRecord>> {
        let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM milk_records"));
        Self::push_filter(&mut query, user_id, range);
        query.push(match order {
            Order::Ascending => " ORDER BY date ASC",
            Order::Descending => " ORDER BY date DESC",
        });
        if let Some(window) = window {
            query
                .push(" LIMIT ")
                .push_bind(i64::try_from(window.limit).unwrap_or(i64::MAX))
                .push(" OFFSET ")
                .push_bind(i64::try_from(window.skip).unwrap_or(i64::MAX));
        }

        Ok(query.build_query_as::<MilkRecord>().fetch_all(&self.pool).await?)
    }

    async fn summarize(&self, user_id: Uuid, range: DateRange) -> Result<RangeSummary> {
        let mut query = QueryBuilder::<Postgres>::new(
            r#"SELECT COUNT(*) AS total,
                COALESCE(SUM(liters), 0) AS total_liters,
                COALESCE(AVG(liters), 0) AS average_liters,
                COUNT(*) FILTER (WHERE status = 'received') AS received,
                COUNT(*) FILTER (WHERE status = 'not_received') AS not_received,
                COUNT(*) FILTER (WHERE status = 'partial') AS partial,
                COUNT(*) FILTER (WHERE is_auto_marked) AS auto_marked
                FROM milk_records"#,
        );
        Self::push_filter(&mut query, user_id, range);

        let row = query.build_query_as::<SummaryRow>().fetch_one(&self.pool).await?;
        let count = |n: i64| u64::try_from(n).unwrap_or_default();
        Ok(RangeSummary {
            total_records: count(row.total),
            statistics: RangeStatistics {
                total_liters: row.total_liters,
                average_liters: row.average_liters,
                received_count: count(row.received),
                not_received_count: count(row.not_received),
                partial_count: count(row.partial),
                auto_marked_count: count(row.auto_marked),
            },
        })
    }

    async fn insert_many(&self, records: Vec<MilkRecord>) -> Result<Vec<InsertOutcome>> {
        // `DO NOTHING` keeps conflicts from aborting the transaction, any
        // other failure rolls back the whole batch.
        let mut tx = self.pool.begin().await?;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let outcome = match Self::insert_returning(&mut *tx, &record, true).await? {
                Some(created) => InsertOutcome::Created(created),
                None => InsertOutcome::Conflicted(record.date),
            };
            outcomes.push(outcome);
        }
        tx.commit().await?;
        Ok(outcomes)
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM milk_records WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
