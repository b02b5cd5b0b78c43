//! Date contexts: the `YYYY/MM month/DD` key that buckets and orders files.
//!
//! A library tree is laid out by the date a track was added:
//!
//! ```text
//! <root>/2024/01 january/05/Artist/Album/track.mp3
//! ```
//!
//! [`find_date_context`] recovers the date from such a path. The month
//! component must carry both a zero-padded index and the matching English
//! name, so `01 august` and `08 aug` are both rejected.

use crate::error::{LibraryError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Month names indexed by `month - 1`.
pub const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Name for a 1-based month number.
pub fn month_name(month: u8) -> Option<&'static str> {
    MONTHS.get(usize::from(month).checked_sub(1)?).copied()
}

/// A calendar day used to group files.
///
/// Ordering is chronological and agrees with the ordering of the rendered
/// strings, since every field is fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateContext {
    year: u16,
    month: u8,
    day: u8,
}

impl DateContext {
    /// Builds a context from numeric parts.
    pub fn new(year: u16, month: u8, day: u8) -> Result<Self> {
        let invalid = |message: &str| LibraryError::InvalidDate {
            value: format!("{:04}-{:02}-{:02}", year, month, day),
            message: message.to_string(),
        };

        if year > 9999 {
            return Err(invalid("year must have four digits"));
        }
        if month_name(month).is_none() {
            return Err(invalid("month out of range"));
        }
        // Any two-digit day folder is a valid key, calendar or not.
        if day > 99 {
            return Err(invalid("day must have two digits"));
        }

        Ok(Self { year, month, day })
    }

    /// Parses a manifest `YYYY-MM-DD` date.
    pub fn from_date_added(value: &str) -> Result<Self> {
        let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| {
            LibraryError::InvalidDate {
                value: value.to_string(),
                message: e.to_string(),
            }
        })?;

        let year = u16::try_from(date.year()).map_err(|_| LibraryError::InvalidDate {
            value: value.to_string(),
            message: "year out of range".to_string(),
        })?;

        Self::new(year, date.month() as u8, date.day() as u8)
    }

    pub fn year(&self) -> u16 {
        self.year
    }

    pub fn month(&self) -> u8 {
        self.month
    }

    pub fn day(&self) -> u8 {
        self.day
    }

    /// Relative directory for this date: `YYYY/MM month/DD`.
    pub fn to_path(&self) -> PathBuf {
        let mut path = PathBuf::from(format!("{:04}", self.year));
        path.push(self.month_component());
        path.push(format!("{:02}", self.day));
        path
    }

    fn month_component(&self) -> String {
        // month is validated on construction
        let name = month_name(self.month).unwrap_or_default();
        format!("{:02} {}", self.month, name)
    }
}

impl fmt::Display for DateContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}/{}/{:02}",
            self.year,
            self.month_component(),
            self.day
        )
    }
}

impl FromStr for DateContext {
    type Err = LibraryError;

    /// Parses the rendered form, `YYYY/MM month/DD`, and nothing else.
    fn from_str(s: &str) -> Result<Self> {
        let unparseable = || LibraryError::UnparseableDateContext {
            path: PathBuf::from(s),
        };

        let mut parts = s.trim().split('/');
        let (Some(year), Some(month), Some(day), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(unparseable());
        };

        let year = parse_year(year).ok_or_else(unparseable)?;
        let month = parse_month(month).ok_or_else(unparseable)?;
        let day = parse_day(day).ok_or_else(unparseable)?;
        Self::new(year, month, day)
    }
}

impl TryFrom<String> for DateContext {
    type Error = LibraryError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DateContext> for String {
    fn from(context: DateContext) -> Self {
        context.to_string()
    }
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_year(component: &str) -> Option<u16> {
    is_digits(component, 4).then(|| component.parse().ok())?
}

fn parse_month(component: &str) -> Option<u8> {
    let mut tokens = component.split_whitespace();
    let (Some(index), Some(name), None) = (tokens.next(), tokens.next(), tokens.next()) else {
        return None;
    };
    if !is_digits(index, 2) {
        return None;
    }

    let month: u8 = index.parse().ok()?;
    (month_name(month)? == name).then_some(month)
}

fn parse_day(component: &str) -> Option<u8> {
    is_digits(component, 2).then(|| component.parse().ok())?
}

/// Finds the date context in `path`.
///
/// Returns the context and the index of its year component, counting the
/// root directory of an absolute path as component 0. Only the first
/// four-digit component is considered a year, and the month and day must
/// follow it directly.
///
/// ```
/// use core_library::date_context::find_date_context;
///
/// let (context, index) = find_date_context("/a/b/2022/04 april/24/x.mp3").unwrap();
/// assert_eq!(context.to_string(), "2022/04 april/24");
/// assert_eq!(index, 3);
/// ```
pub fn find_date_context(path: impl AsRef<Path>) -> Option<(DateContext, usize)> {
    let components: Vec<String> = path
        .as_ref()
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let (year_index, year) = components
        .iter()
        .enumerate()
        .find_map(|(i, c)| parse_year(c).map(|y| (i, y)))?;

    let month = parse_month(components.get(year_index + 1)?)?;
    let day = parse_day(components.get(year_index + 2)?)?;

    DateContext::new(year, month, day)
        .ok()
        .map(|context| (context, year_index))
}
