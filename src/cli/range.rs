use std::fmt::Display;

use anyhow::Result;
use chrono::{DateTime, Duration, Local, Utc};
use chrono_english::parse_date_string;
use clap::{CommandFactory, ValueEnum};
use now::DateTimeNow;

use super::Args;

const DEFAULT_RANGE_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DateStyle {
    Uk,
    Us,
}

impl From<DateStyle> for chrono_english::Dialect {
    fn from(value: DateStyle) -> Self {
        match value {
            DateStyle::Uk => Self::Uk,
            DateStyle::Us => Self::Us,
        }
    }
}

impl Display for DateStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStyle::Uk => write!(f, "uk"),
            DateStyle::Us => write!(f, "us"),
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct RangeArgs {
    #[arg(
        long = "start",
        short,
        help = "Start of the range. Examples are \"yesterday\", \"1 hour ago\", \"15/03/2025\", \"12:00 16/03/2025\", \"12 AM 16/03/2025\""
    )]
    pub start_date: Option<String>,
    #[arg(
        long = "end",
        short,
        help = "End of the range. Examples are \"yesterday\", \"1 hour ago\", \"15/03/2025\", \"12:00 16/03/2025\", \"12 AM 16/03/2025\""
    )]
    pub end_date: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk, help = "Style of dates used during parsing. For Uk it's day/month/year. For Us it's month/day/year")]
    pub date_style: DateStyle,
    #[arg(
        long = "days",
        default_value_t = false,
        help = "Take inputs as whole days. For example if start and end are both 15/03/2025 this option allows to extract the whole day"
    )]
    pub treat_as_days: bool,
}

fn validation_error(message: String) -> anyhow::Error {
    Args::command()
        .error(clap::error::ErrorKind::ValueValidation, message)
        .into()
}

impl RangeArgs {
    /// Whether neither end of the range was given.
    pub fn is_unbounded(&self) -> bool {
        self.start_date.is_none() && self.end_date.is_none()
    }

    /// Resolves the range relative to `now`. Without a start the range covers the last day.
    pub fn resolve(&self, now: DateTime<Local>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let dialect: chrono_english::Dialect = self.date_style.into();
        let parse = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .map(|v| parse_date_string(v, now, dialect))
                .transpose()
                .map_err(|e| validation_error(format!("Failed to validate {name} date {e}")))
        };

        let mut end = parse(&self.end_date, "end")?.unwrap_or(now);
        let mut start = parse(&self.start_date, "start")?.unwrap_or(end - Duration::hours(DEFAULT_RANGE_HOURS));
        if self.treat_as_days {
            start = start.beginning_of_day();
            end = end.end_of_day();
        }
        if start > end {
            return Err(validation_error(format!(
                "Start {start} is after end {end}"
            )));
        }
        Ok((start.with_timezone(&Utc), end.with_timezone(&Utc)))
    }
}
