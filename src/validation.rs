//! Field rules shared by records and accounts.
//!
//! Rules never stop at the first failure: a [`Check`] collects every reason
//! and callers merge checks before reporting.

use std::borrow::Cow;
use std::sync::LazyLock;

use chrono::{DateTime, Months, NaiveDate, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use validator::ValidationError;

pub const MAX_LITERS: f64 = 50.0;
pub const MAX_NOTES_LENGTH: usize = 200;
const USERNAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=30;
const PASSWORD_LENGTH: std::ops::RangeInclusive<usize> = 6..=128;
const DATE_WINDOW: Months = Months::new(12);

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("valid username pattern"));
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{10}$").expect("valid phone pattern"));

/// Outcome of a rule: valid when no reason was recorded.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Check {
    pub errors: Vec<String>,
}

impl Check {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn fail(&mut self, reason: &str) {
        self.errors.push(reason.to_owned());
    }

    /// Append every reason of `other`.
    pub fn merge(mut self, other: Check) -> Self {
        self.errors.extend(other.errors);
        self
    }
}

/// Milk quantity as sent by clients: a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(f64),
    Text(String),
}

impl Quantity {
    /// Numeric value, if any.
    pub fn value(&self) -> Option<f64> {
        let value = match self {
            Quantity::Number(n) => *n,
            Quantity::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        (!value.is_nan()).then_some(value)
    }
}

impl From<f64> for Quantity {
    fn from(value: f64) -> Self {
        Quantity::Number(value)
    }
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp into its UTC day.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    NaiveDate::parse_from_str(input, "%Y-%m-%d").ok().or_else(|| {
        DateTime::parse_from_rfc3339(input)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).date_naive())
    })
}

/// Date must be a real day within one year of `today`, either way.
pub fn validate_date(date: Option<&str>, today: NaiveDate) -> Check {
    let mut check = Check::default();

    let Some(date) = date.filter(|d| !d.trim().is_empty()) else {
        check.fail("Date is required");
        return check;
    };
    let Some(date) = parse_date(date) else {
        check.fail("Invalid date format");
        return check;
    };

    if today
        .checked_sub_months(DATE_WINDOW)
        .is_some_and(|earliest| date < earliest)
    {
        check.fail("Date cannot be more than one year in the past");
    }
    if today
        .checked_add_months(DATE_WINDOW)
        .is_some_and(|latest| date > latest)
    {
        check.fail("Date cannot be more than one year in the future");
    }

    check
}

pub fn validate_quantity(quantity: Option<&Quantity>) -> Check {
    let mut check = Check::default();

    let Some(quantity) = quantity else {
        check.fail("Milk quantity is required");
        return check;
    };
    match quantity.value() {
        None => check.fail("Milk quantity must be a valid number"),
        Some(liters) => {
            if liters < 0.0 {
                check.fail("Milk quantity cannot be negative");
            }
            if liters > MAX_LITERS {
                check.fail("Milk quantity cannot exceed 50 liters");
            }
        },
    }

    check
}

pub fn validate_notes(notes: Option<&str>) -> Check {
    let mut check = Check::default();
    if notes.is_some_and(|n| n.trim().chars().count() > MAX_NOTES_LENGTH) {
        check.fail("Notes cannot exceed 200 characters");
    }
    check
}

pub fn validate_username(username: &str) -> Check {
    let mut check = Check::default();

    if username.is_empty() {
        check.fail("Username is required");
        return check;
    }
    let length = username.chars().count();
    if length < *USERNAME_LENGTH.start() {
        check.fail("Username must be at least 3 characters long");
    }
    if length > *USERNAME_LENGTH.end() {
        check.fail("Username must be no more than 30 characters long");
    }
    if !USERNAME.is_match(username) {
        check.fail("Username can only contain letters, numbers, and underscores");
    }

    check
}

pub fn validate_phone(phone: &str) -> Check {
    let mut check = Check::default();

    if phone.is_empty() {
        check.fail("Phone number is required");
    } else if !PHONE.is_match(phone) {
        check.fail("Phone number must be exactly 10 digits");
    }

    check
}

pub fn validate_password(password: &str) -> Check {
    let mut check = Check::default();

    if password.is_empty() {
        check.fail("Password is required");
        return check;
    }
    let length = password.chars().count();
    if length < *PASSWORD_LENGTH.start() {
        check.fail("Password must be at least 6 characters long");
    }
    if length > *PASSWORD_LENGTH.end() {
        check.fail("Password must be no more than 128 characters long");
    }

    check
}

fn into_validation_error(code: &'static str, check: Check) -> Result<(), ValidationError> {
    if check.is_valid() {
        Ok(())
    } else {
        Err(ValidationError::new(code).with_message(Cow::Owned(check.errors.join(". "))))
    }
}

/// `validator` adapter for [`validate_username`].
pub fn username_rule(username: &str) -> Result<(), ValidationError> {
    into_validation_error("username", validate_username(username.trim()))
}

/// `validator` adapter for [`validate_phone`].
pub fn phone_rule(phone: &str) -> Result<(), ValidationError> {
    into_validation_error("phone", validate_phone(phone.trim()))
}

/// `validator` adapter for [`validate_password`].
pub fn password_rule(password: &str) -> Result<(), ValidationError> {
    into_validation_error("password", validate_password(password))
}
