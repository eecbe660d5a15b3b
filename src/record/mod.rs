//! Daily milk records.
mod memory;
mod repository;
mod service;

pub use memory::*;
pub use repository::*;
pub use service::*;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_LITERS: f64 = 1.0;

/// Unknown textual value for an enumerated column.
#[derive(Debug, thiserror::Error)]
#[error("unknown variant `{0}`")]
pub struct UnknownVariant(String);

/// Delivery outcome of a day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Received,
    NotReceived,
    Partial,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Received, Status::NotReceived, Status::Partial];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Received => "received",
            Status::NotReceived => "not_received",
            Status::Partial => "partial",
        }
    }
}

impl TryFrom<String> for Status {
    type Error = UnknownVariant;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "received" => Ok(Status::Received),
            "not_received" => Ok(Status::NotReceived),
            "partial" => Ok(Status::Partial),
            _ => Err(UnknownVariant(value)),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MilkType {
    #[default]
    Cow,
    Buffalo,
    Packet,
    Other,
}

impl MilkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilkType::Cow => "cow",
            MilkType::Buffalo => "buffalo",
            MilkType::Packet => "packet",
            MilkType::Other => "other",
        }
    }
}

impl TryFrom<String> for MilkType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        match value.as_str() {
            "cow" => Ok(MilkType::Cow),
            "buffalo" => Ok(MilkType::Buffalo),
            "packet" => Ok(MilkType::Packet),
            "other" => Ok(MilkType::Other),
            _ => Err(UnknownVariant(value)),
        }
    }
}

impl std::fmt::Display for MilkType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's record for one calendar day.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MilkRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub liters: f64,
    #[sqlx(try_from = "String")]
    pub status: Status,
    #[sqlx(try_from = "String")]
    pub milk_type: MilkType,
    pub notes: String,
    pub is_auto_marked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MilkRecord {
    /// Record entered by the user, defaults filled by `patch`.
    pub fn explicit(user_id: Uuid, date: NaiveDate, patch: &RecordPatch, at: DateTime<Utc>) -> Self {
        let mut record = Self::auto_marked(user_id, date, at);
        patch.apply_to(&mut record, at);
        record
    }

    /// Default-assumption record: milk received, one liter, pending
    /// confirmation.
    pub fn auto_marked(user_id: Uuid, date: NaiveDate, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            date,
            liters: DEFAULT_LITERS,
            status: Status::default(),
            milk_type: MilkType::default(),
            notes: String::new(),
            is_auto_marked: true,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Fields provided by a user edit. `None` keeps the stored value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordPatch {
    pub liters: Option<f64>,
    pub status: Option<Status>,
    pub notes: Option<String>,
    pub milk_type: Option<MilkType>,
}

impl RecordPatch {
    /// Merge into `record`. A user edit always confirms the day.
    pub fn apply_to(&self, record: &mut MilkRecord, at: DateTime<Utc>) {
        if let Some(liters) = self.liters {
            record.liters = liters;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(notes) = &self.notes {
            record.notes = notes.clone();
        }
        if let Some(milk_type) = self.milk_type {
            record.milk_type = milk_type;
        }
        record.is_auto_marked = false;
        record.updated_at = at;
    }
}

/// Inclusive day range; a missing bound is open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| date >= start) && self.end.is_none_or(|end| date <= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> DateTime<Utc> {
        "2024-03-01T08:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_explicit_record_defaults() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let record = MilkRecord::explicit(Uuid::new_v4(), date, &RecordPatch::default(), at());

        assert_eq!(record.liters, 1.0);
        assert_eq!(record.status, Status::Received);
        assert_eq!(record.milk_type, MilkType::Cow);
        assert_eq!(record.notes, "");
        assert!(!record.is_auto_marked);
    }

    #[test]
    fn test_patch_keeps_omitted_fields() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut record = MilkRecord::auto_marked(Uuid::new_v4(), date, at());
        record.status = Status::Partial;
        record.notes = "late".into();

        let later: DateTime<Utc> = "2024-03-01T20:00:00Z".parse().unwrap();
        RecordPatch {
            liters: Some(3.0),
            ..Default::default()
        }
        .apply_to(&mut record, later);

        assert_eq!(record.liters, 3.0);
        assert_eq!(record.status, Status::Partial);
        assert_eq!(record.notes, "late");
        assert!(!record.is_auto_marked);
        assert_eq!(record.updated_at, later);
        assert_eq!(record.created_at, at());
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&Status::NotReceived).unwrap(), "\"not_received\"");
        assert_eq!(serde_json::to_string(&MilkType::Buffalo).unwrap(), "\"buffalo\"");
        assert!(Status::try_from("missing".to_owned()).is_err());
        assert_eq!(MilkType::try_from("packet".to_owned()).unwrap(), MilkType::Packet);

        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let json = serde_json::to_value(MilkRecord::auto_marked(Uuid::nil(), date, at())).unwrap();
        assert_eq!(json["date"], "2024-03-01");
        assert_eq!(json["isAutoMarked"], true);
        assert_eq!(json["milkType"], "cow");
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let range = DateRange::new(Some(d(2)), Some(d(4)));

        assert!(!range.contains(d(1)));
        assert!(range.contains(d(2)));
        assert!(range.contains(d(4)));
        assert!(!range.contains(d(5)));
        assert!(DateRange::default().contains(d(1)));
    }
}
