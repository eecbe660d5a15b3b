//! In-process record store.
//!
//! One lock guards both the rows and the `(user, date)` index, so every
//! operation is atomic with respect to the others.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::stats::{self, RangeSummary};
use crate::record::{
    DateRange, InsertOutcome, MilkRecord, Order, RecordPatch, RecordStore, Result, USER_DATE_KEY,
    Window,
};

#[derive(Default)]
struct Inner {
    rows: HashMap<Uuid, MilkRecord>,
    by_day: HashMap<(Uuid, NaiveDate), Uuid>,
}

impl Inner {
    fn insert(&mut self, record: MilkRecord) -> Result<MilkRecord> {
        let key = (record.user_id, record.date);
        if self.by_day.contains_key(&key) {
            return Err(StoreError::Conflict(USER_DATE_KEY));
        }
        self.by_day.insert(key, record.id);
        self.rows.insert(record.id, record.clone());
        Ok(record)
    }

    fn owned_mut(&mut self, user_id: Uuid, id: Uuid) -> Option<&mut MilkRecord> {
        self.rows.get_mut(&id).filter(|r| r.user_id == user_id)
    }

    fn remove(&mut self, id: Uuid) -> Option<MilkRecord> {
        let record = self.rows.remove(&id)?;
        self.by_day.remove(&(record.user_id, record.date));
        Some(record)
    }
}

/// [`RecordStore`] kept in memory. Data is lost on restart.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: RwLock<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_date(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<MilkRecord>> {
        let inner = self.read();
        Ok(inner
            .by_day
            .get(&(user_id, date))
            .and_then(|id| inner.rows.get(id))
            .cloned())
    }

    async fn insert(&self, record: &MilkRecord) -> Result<()> {
        self.write().insert(record.clone())?;
        Ok(())
    }

    async fn get_or_insert(&self, record: MilkRecord) -> Result<(MilkRecord, bool)> {
        let mut inner = self.write();
        if let Some(existing) = inner
            .by_day
            .get(&(record.user_id, record.date))
            .and_then(|id| inner.rows.get(id))
        {
            return Ok((existing.clone(), false));
        }
        Ok((inner.insert(record)?, true))
    }

    async fn patch_by_date(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        patch: &RecordPatch,
        at: DateTime<Utc>,
    ) -> Result<Option<MilkRecord>> {
        let mut inner = self.write();
        let Some(id) = inner.by_day.get(&(user_id, date)).copied() else {
            return Ok(None);
        };
        Ok(inner.rows.get_mut(&id).map(|record| {
            patch.apply_to(record, at);
            record.clone()
        }))
    }

    async fn confirm(&self, user_id: Uuid, id: Uuid, at: DateTime<Utc>) -> Result<Option<MilkRecord>> {
        let mut inner = self.write();
        Ok(inner.owned_mut(user_id, id).map(|record| {
            record.is_auto_marked = false;
            record.updated_at = at;
            record.clone()
        }))
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<Option<MilkRecord>> {
        let mut inner = self.write();
        if inner.owned_mut(user_id, id).is_none() {
            return Ok(None);
        }
        Ok(inner.remove(id))
    }

    async fn find_range(
        &self,
        user_id: Uuid,
        range: DateRange,
        order: Order,
        window: Option<Window>,
    ) -> Result<Vec<MilkRecord>> {
        let mut records: Vec<MilkRecord> = self
            .read()
            .rows
            .values()
            .filter(|r| r.user_id == user_id && range.contains(r.date))
            .cloned()
            .collect();

        match order {
            Order::Ascending => records.sort_by_key(|r| r.date),
            Order::Descending => records.sort_by_key(|r| std::cmp::Reverse(r.date)),
        }

        Ok(match window {
            Some(Window { skip, limit }) => records
                .into_iter()
                .skip(usize::try_from(skip).unwrap_or(usize::MAX))
                .take(usize::try_from(limit).unwrap_or(usize::MAX))
                .collect(),
            None => records,
        })
    }

    async fn summarize(&self, user_id: Uuid, range: DateRange) -> Result<RangeSummary> {
        let records = self.find_range(user_id, range, Order::Ascending, None).await?;
        Ok(RangeSummary {
            total_records: records.len() as u64,
            statistics: stats::range_statistics(&records),
        })
    }

    async fn insert_many(&self, records: Vec<MilkRecord>) -> Result<Vec<InsertOutcome>> {
        let mut inner = self.write();
        Ok(records
            .into_iter()
            .map(|record| {
                let date = record.date;
                match inner.insert(record) {
                    Ok(created) => InsertOutcome::Created(created),
                    Err(_) => InsertOutcome::Conflicted(date),
                }
            })
            .collect())
    }

    async fn delete_created_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.write();
        let expired: Vec<Uuid> = inner
            .rows
            .values()
            .filter(|r| r.created_at < cutoff)
            .map(|r| r.id)
            .collect();
        for id in &expired {
            inner.remove(*id);
        }
        Ok(expired.len() as u64)
    }
}
