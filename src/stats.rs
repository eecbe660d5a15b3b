//! Statistics over record sets.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::record::{DateRange, MilkRecord, Status};

pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Totals over a date range.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeStatistics {
    pub total_liters: f64,
    pub average_liters: f64,
    pub received_count: u64,
    pub not_received_count: u64,
    pub partial_count: u64,
    /// Records still waiting for confirmation.
    pub auto_marked_count: u64,
}

/// Record count of a range next to its statistics.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RangeSummary {
    pub total_records: u64,
    pub statistics: RangeStatistics,
}

pub fn range_statistics(records: &[MilkRecord]) -> RangeStatistics {
    let mut stats = RangeStatistics::default();
    for record in records {
        stats.total_liters += record.liters;
        match record.status {
            Status::Received => stats.received_count += 1,
            Status::NotReceived => stats.not_received_count += 1,
            Status::Partial => stats.partial_count += 1,
        }
        if record.is_auto_marked {
            stats.auto_marked_count += 1;
        }
    }
    stats.average_liters = mean(stats.total_liters, records.len());
    stats
}

fn mean(total: f64, count: usize) -> f64 {
    if count == 0 { 0.0 } else { total / count as f64 }
}

/// Requested page, clamped to valid bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub limit: u64,
}

impl PageRequest {
    /// Page defaults to 1, size to 50 within `[1, 100]`.
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1) as u64;
        let limit = limit
            .map(|l| l.clamp(1, MAX_PAGE_SIZE as i64) as u64)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        Self { page, limit }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u64,
    pub total_pages: u64,
    pub total_records: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(request: PageRequest, total_records: u64) -> Self {
        let total_pages = total_records.div_ceil(request.limit);
        Self {
            current_page: request.page,
            total_pages,
            total_records,
            has_next_page: request.page < total_pages,
            has_prev_page: request.page > 1,
        }
    }
}

/// Count and liters of one status on one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSubtotal {
    pub status: Status,
    pub count: u64,
    pub total_liters: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    /// Day of month.
    pub day: u32,
    pub statuses: Vec<StatusSubtotal>,
    pub daily_total: f64,
}

/// Month-wide totals, counted in days.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyOverview {
    pub total_liters: f64,
    pub average_liters: f64,
    pub total_days: u64,
    pub received_days: u64,
    pub missed_days: u64,
    pub partial_days: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyBreakdown {
    pub year: i32,
    pub month: u32,
    pub daily_stats: Vec<DailyStat>,
    pub monthly_overview: MonthlyOverview,
}

/// First to last day of a calendar month. `None` for an invalid month.
pub fn month_range(year: i32, month: u32) -> Option<DateRange> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last = first
        .checked_add_months(chrono::Months::new(1))?
        .pred_opt()?;
    Some(DateRange::new(Some(first), Some(last)))
}

/// Group the records of a month by day and status.
///
/// Days are ascending; statuses inside a day follow [`Status::ALL`] and only
/// statuses present that day are listed.
pub fn monthly_breakdown(year: i32, month: u32, records: &[MilkRecord]) -> MonthlyBreakdown {
    let mut days: BTreeMap<u32, Vec<&MilkRecord>> = BTreeMap::new();
    for record in records {
        days.entry(record.date.day()).or_default().push(record);
    }

    let daily_stats = days
        .into_iter()
        .map(|(day, records)| {
            let statuses = Status::ALL
                .iter()
                .filter_map(|status| {
                    let matching = records.iter().filter(|r| r.status == *status);
                    let (count, total_liters) =
                        matching.fold((0u64, 0.0), |(c, l), r| (c + 1, l + r.liters));
                    (count > 0).then_some(StatusSubtotal {
                        status: *status,
                        count,
                        total_liters,
                    })
                })
                .collect::<Vec<_>>();
            let daily_total = statuses.iter().map(|s| s.total_liters).sum();

            DailyStat {
                day,
                statuses,
                daily_total,
            }
        })
        .collect();

    let range = range_statistics(records);
    let monthly_overview = MonthlyOverview {
        total_liters: range.total_liters,
        average_liters: range.average_liters,
        total_days: records.len() as u64,
        received_days: range.received_count,
        missed_days: range.not_received_count,
        partial_days: range.partial_count,
    };

    MonthlyBreakdown {
        year,
        month,
        daily_stats,
        monthly_overview,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::*;

    fn record(day: u32, liters: f64, status: Status, auto: bool) -> MilkRecord {
        let at: DateTime<Utc> = "2024-03-15T10:00:00Z".parse().unwrap();
        let mut record =
            MilkRecord::auto_marked(Uuid::nil(), NaiveDate::from_ymd_opt(2024, 3, day).unwrap(), at);
        record.liters = liters;
        record.status = status;
        record.is_auto_marked = auto;
        record
    }

    #[test]
    fn test_empty_statistics_are_zero() {
        assert_eq!(range_statistics(&[]), RangeStatistics::default());
        let stats = range_statistics(&[]);
        assert_eq!(stats.total_liters, 0.0);
        assert_eq!(stats.average_liters, 0.0);
    }

    #[test]
    fn test_range_statistics() {
        let records = [
            record(1, 2.0, Status::Received, false),
            record(2, 0.0, Status::NotReceived, false),
            record(3, 1.0, Status::Partial, true),
        ];
        let stats = range_statistics(&records);

        assert_eq!(stats.total_liters, 3.0);
        assert_eq!(stats.average_liters, 1.0);
        assert_eq!(stats.received_count, 1);
        assert_eq!(stats.not_received_count, 1);
        assert_eq!(stats.partial_count, 1);
        assert_eq!(stats.auto_marked_count, 1);
    }

    #[test]
    fn test_page_request_clamps() {
        assert_eq!(PageRequest::new(None, None), PageRequest { page: 1, limit: 50 });
        assert_eq!(PageRequest::new(Some(0), Some(500)), PageRequest { page: 1, limit: 100 });
        assert_eq!(PageRequest::new(Some(-4), Some(0)), PageRequest { page: 1, limit: 1 });
        assert_eq!(PageRequest::new(Some(3), Some(10)).skip(), 20);
    }

    #[test]
    fn test_pagination_flags() {
        let first = Pagination::new(PageRequest::new(Some(1), Some(10)), 25);
        assert_eq!(first.total_pages, 3);
        assert!(first.has_next_page);
        assert!(!first.has_prev_page);

        let last = Pagination::new(PageRequest::new(Some(3), Some(10)), 25);
        assert!(!last.has_next_page);
        assert!(last.has_prev_page);

        let empty = Pagination::new(PageRequest::default(), 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
    }

    #[test]
    fn test_month_range() {
        let feb = month_range(2024, 2).unwrap();
        assert_eq!(feb.start, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(feb.end, NaiveDate::from_ymd_opt(2024, 2, 29));

        let dec = month_range(2023, 12).unwrap();
        assert_eq!(dec.end, NaiveDate::from_ymd_opt(2023, 12, 31));

        assert!(month_range(2024, 13).is_none());
        assert!(month_range(2024, 0).is_none());
    }

    #[test]
    fn test_empty_month() {
        let breakdown = monthly_breakdown(2024, 3, &[]);
        assert!(breakdown.daily_stats.is_empty());
        assert_eq!(breakdown.monthly_overview, MonthlyOverview::default());
        assert_eq!(breakdown.monthly_overview.total_days, 0);
    }

    #[test]
    fn test_monthly_breakdown_groups_by_day() {
        let records = [
            record(9, 2.0, Status::Received, false),
            record(2, 0.5, Status::Partial, false),
            record(5, 0.0, Status::NotReceived, true),
        ];
        let breakdown = monthly_breakdown(2024, 3, &records);

        let days: Vec<u32> = breakdown.daily_stats.iter().map(|d| d.day).collect();
        assert_eq!(days, [2, 5, 9]);

        let second = &breakdown.daily_stats[0];
        assert_eq!(second.statuses.len(), 1);
        assert_eq!(second.statuses[0].status, Status::Partial);
        assert_eq!(second.statuses[0].count, 1);
        assert_eq!(second.daily_total, 0.5);

        let overview = &breakdown.monthly_overview;
        assert_eq!(overview.total_days, 3);
        assert_eq!(overview.received_days, 1);
        assert_eq!(overview.missed_days, 1);
        assert_eq!(overview.partial_days, 1);
        assert_eq!(overview.total_liters, 2.5);
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_value(monthly_breakdown(2024, 3, &[])).unwrap();
        assert_eq!(json["monthlyOverview"]["totalDays"], 0);
        assert!(json["dailyStats"].as_array().unwrap().is_empty());
    }
}
