use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Listings are cut at this many entries.
pub const MAX_RANK: usize = 20;

const JST_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Store {
    Amazon,
    Cmoa,
}

impl Store {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amazon => "Amazon",
            Self::Cmoa => "Cmoa",
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankingRow {
    pub date: NaiveDate,
    pub store: Store,
    pub category: String,
    pub rank: u32,
    pub title: String,
    pub url: String,
    pub thumb: Option<String>,
}

#[derive(Debug, Error)]
#[error("{store} {category} #{rank}: {reason}")]
pub struct ExtractError {
    pub store: Store,
    pub category: String,
    pub rank: u32,
    pub reason: &'static str,
}

pub type Extracted = Result<RankingRow, ExtractError>;

/// The run's logical date, a calendar day in Japan time.
pub fn logical_date(now: DateTime<Utc>) -> NaiveDate {
    let jst = FixedOffset::east_opt(JST_OFFSET_SECS).expect("+09:00 is in range");
    now.with_timezone(&jst).date_naive()
}

pub fn today() -> NaiveDate {
    logical_date(Utc::now())
}
