//! Daily reconciliation: how a day's record is created, auto-marked,
//! confirmed, updated and removed.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{EntryErrors, Result, ServerError, StoreError};
use crate::record::{
    DateRange, InsertOutcome, MilkRecord, MilkType, Order, RecordPatch, RecordStore, Status,
    Window,
};
use crate::stats::{self, MonthlyBreakdown, PageRequest, Pagination, RangeStatistics};
use crate::validation::{self, Check, Quantity};

pub const MAX_BATCH_SIZE: usize = 100;
pub(crate) const RECORD_NOT_FOUND: &str = "Record not found";
const DATE_TAKEN: &str = "Record already exists for this date";

/// Record fields as sent by a client, not validated yet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordInput {
    pub date: Option<String>,
    pub liters: Option<Quantity>,
    pub status: Option<Status>,
    pub notes: Option<String>,
    pub milk_type: Option<MilkType>,
    /// Only honored by bulk creation.
    pub is_auto_marked: Option<bool>,
}

impl RecordInput {
    /// Every rule violation of this input. Omitted `liters` is accepted.
    pub fn check(&self, today: NaiveDate) -> Check {
        let quantity = match &self.liters {
            Some(liters) => validation::validate_quantity(Some(liters)),
            None => Check::default(),
        };
        validation::validate_date(self.date.as_deref(), today)
            .merge(quantity)
            .merge(validation::validate_notes(self.notes.as_deref()))
    }

    /// Like [`RecordInput::check`], with `liters` mandatory.
    pub fn check_entry(&self, today: NaiveDate) -> Check {
        validation::validate_date(self.date.as_deref(), today)
            .merge(validation::validate_quantity(self.liters.as_ref()))
            .merge(validation::validate_notes(self.notes.as_deref()))
    }

    /// Day and patch of a valid input, or the reasons it is not.
    fn validated(
        self,
        today: NaiveDate,
        require_liters: bool,
    ) -> std::result::Result<(NaiveDate, RecordPatch), Vec<String>> {
        let check = if require_liters {
            self.check_entry(today)
        } else {
            self.check(today)
        };
        let date = self.date.as_deref().and_then(validation::parse_date);
        match date {
            Some(date) if check.is_valid() => Ok((
                date,
                RecordPatch {
                    liters: self.liters.as_ref().and_then(Quantity::value),
                    status: self.status,
                    notes: self.notes.map(|n| n.trim().to_owned()),
                    milk_type: self.milk_type,
                },
            )),
            _ => Err(check.errors),
        }
    }
}

/// Result of [`RecordService::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub record: MilkRecord,
    pub created: bool,
}

/// Per-entry result of a bulk creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BulkOutcome {
    Created { index: usize, record: MilkRecord },
    Conflicted { index: usize, date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub outcomes: Vec<BulkOutcome>,
    pub created_records: usize,
    pub total_requested: usize,
}

impl BulkReport {
    /// Some entries hit an existing day.
    pub fn is_partial(&self) -> bool {
        self.created_records < self.total_requested
    }
}

/// A page of records with statistics over the whole range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPage {
    pub records: Vec<MilkRecord>,
    pub pagination: Pagination,
    pub statistics: RangeStatistics,
}

/// Record use-cases for an already authenticated user.
#[derive(Clone)]
pub struct RecordService {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl RecordService {
    /// Create a new [`RecordService`].
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.store)
    }

    /// Add or update the record of a day.
    ///
    /// Existing records only receive the provided fields and are confirmed.
    /// Missing days are created with defaults for omitted fields.
    pub async fn upsert(&self, user_id: Uuid, input: RecordInput) -> Result<Upserted> {
        let now = self.clock.now();
        let (date, patch) = input
            .validated(now.date_naive(), false)
            .map_err(|reasons| ServerError::invalid("Invalid milk record.", reasons))?;

        if let Some(record) = self.store.patch_by_date(user_id, date, &patch, now).await? {
            tracing::debug!(%user_id, %date, "milk record updated");
            return Ok(Upserted {
                record,
                created: false,
            });
        }

        let record = MilkRecord::explicit(user_id, date, &patch, now);
        match self.store.insert(&record).await {
            Ok(()) => {
                metrics::counter!("milk_records_created_total", "origin" => "user").increment(1);
                tracing::debug!(%user_id, %date, "milk record created");
                Ok(Upserted {
                    record,
                    created: true,
                })
            },
            Err(StoreError::Conflict(_)) => Err(ServerError::Conflict(DATE_TAKEN.to_owned())),
            Err(err) => Err(err.into()),
        }
    }

    /// Record of the current day, auto-marked as received when missing.
    pub async fn today(&self, user_id: Uuid) -> Result<(MilkRecord, bool)> {
        let now = self.clock.now();
        let (record, is_new) = self
            .store
            .get_or_insert(MilkRecord::auto_marked(user_id, now.date_naive(), now))
            .await?;

        if is_new {
            metrics::counter!("milk_records_created_total", "origin" => "auto").increment(1);
            tracing::debug!(%user_id, date = %record.date, "auto-marked today's record");
        }
        Ok((record, is_new))
    }

    /// Ratify an auto-marked record. Confirming twice is harmless.
    pub async fn confirm(&self, user_id: Uuid, id: Uuid) -> Result<MilkRecord> {
        self.store
            .confirm(user_id, id, self.clock.now())
            .await?
            .ok_or(ServerError::NotFound(RECORD_NOT_FOUND))
    }

    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<MilkRecord> {
        self.store
            .delete(user_id, id)
            .await?
            .ok_or(ServerError::NotFound(RECORD_NOT_FOUND))
    }

    /// Create up to [`MAX_BATCH_SIZE`] records at once.
    ///
    /// Nothing is written when any entry is invalid. Entries whose day is
    /// already taken are reported as conflicted while the others are kept.
    pub async fn bulk_create(&self, user_id: Uuid, entries: Vec<RecordInput>) -> Result<BulkReport> {
        if entries.is_empty() {
            return Err(ServerError::invalid(
                "Invalid records.",
                vec!["Records array is required".to_owned()],
            ));
        }
        if entries.len() > MAX_BATCH_SIZE {
            return Err(ServerError::invalid(
                "Invalid records.",
                vec![format!("Cannot create more than {MAX_BATCH_SIZE} records at once")],
            ));
        }

        let now = self.clock.now();
        let today = now.date_naive();
        let total_requested = entries.len();

        let mut records = Vec::with_capacity(total_requested);
        let mut rejected = Vec::new();
        for (index, entry) in entries.into_iter().enumerate() {
            let is_auto_marked = entry.is_auto_marked.unwrap_or(false);
            match entry.validated(today, true) {
                Ok((date, patch)) => {
                    let mut record = MilkRecord::explicit(user_id, date, &patch, now);
                    record.is_auto_marked = is_auto_marked;
                    records.push(record);
                },
                Err(errors) => rejected.push(EntryErrors { index, errors }),
            }
        }
        if !rejected.is_empty() {
            return Err(ServerError::BatchRejected(rejected));
        }

        let outcomes: Vec<BulkOutcome> = self
            .store
            .insert_many(records)
            .await?
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| match outcome {
                InsertOutcome::Created(record) => BulkOutcome::Created { index, record },
                InsertOutcome::Conflicted(date) => BulkOutcome::Conflicted { index, date },
            })
            .collect();
        let created_records = outcomes
            .iter()
            .filter(|o| matches!(o, BulkOutcome::Created { .. }))
            .count();

        metrics::counter!("milk_records_created_total", "origin" => "bulk")
            .increment(created_records as u64);
        tracing::info!(%user_id, created_records, total_requested, "bulk records created");

        Ok(BulkReport {
            outcomes,
            created_records,
            total_requested,
        })
    }

    /// Newest first page of records, with totals over the whole range.
    pub async fn list(&self, user_id: Uuid, range: DateRange, page: PageRequest) -> Result<RecordPage> {
        let summary = self.store.summarize(user_id, range).await?;
        let records = self
            .store
            .find_range(
                user_id,
                range,
                Order::Descending,
                Some(Window {
                    skip: page.skip(),
                    limit: page.limit,
                }),
            )
            .await?;

        Ok(RecordPage {
            records,
            pagination: Pagination::new(page, summary.total_records),
            statistics: summary.statistics,
        })
    }

    pub async fn monthly(&self, user_id: Uuid, year: i32, month: u32) -> Result<MonthlyBreakdown> {
        if !(1..=12).contains(&month) {
            return Err(ServerError::invalid(
                "Invalid month.",
                vec!["Month must be between 1 and 12".to_owned()],
            ));
        }
        let range = stats::month_range(year, month).ok_or_else(|| {
            ServerError::invalid("Invalid month.", vec!["Year is out of range".to_owned()])
        })?;
        let records = self
            .store
            .find_range(user_id, range, Order::Ascending, None)
            .await?;

        Ok(stats::monthly_breakdown(year, month, &records))
    }

    /// Records of a range, oldest first.
    pub async fn history(&self, user_id: Uuid, range: DateRange) -> Result<Vec<MilkRecord>> {
        Ok(self
            .store
            .find_range(user_id, range, Order::Ascending, None)
            .await?)
    }
}
