use ansi_term::Colour::{Green, Red, Yellow};
use chrono::Local;

use crate::daemon::storage::entities::{ActivityRecord, ActivityStatistics, Confidence};

const TIME_FORMAT: &str = "%x %H:%M:%S";

fn paint(text: String, colour: ansi_term::Colour, enabled: bool) -> String {
    if enabled {
        colour.paint(text).to_string()
    } else {
        text
    }
}

/// One tab separated line per record: local time, outcome, description or error.
pub fn format_record(record: &ActivityRecord, colour: bool) -> String {
    let time = record.timestamp.with_timezone(&Local).format(TIME_FORMAT);
    let outcome = match (record.successful, record.confidence) {
        (true, Some(Confidence::High)) => paint("high".into(), Green, colour),
        (true, Some(confidence)) => paint(confidence.to_string(), Yellow, colour),
        _ => paint("failed".into(), Red, colour),
    };
    let text = record
        .description
        .as_deref()
        .or(record.error.as_deref())
        .unwrap_or("-");
    format!("{time}\t{outcome}\t{text}")
}

pub fn print_records(records: &[ActivityRecord], colour: bool) {
    if records.is_empty() {
        println!("No activities recorded");
        return;
    }
    for record in records {
        println!("{}", format_record(record, colour));
    }
}

pub fn format_statistics(statistics: &ActivityStatistics) -> String {
    let moment = |v: Option<chrono::DateTime<chrono::Utc>>| {
        v.map(|v| v.with_timezone(&Local).format(TIME_FORMAT).to_string())
            .unwrap_or_else(|| "-".into())
    };
    format!(
        "Total:\t\t{}\nSuccessful:\t{}\nFailed:\t\t{}\nSuccess rate:\t{:.2}%\nFirst:\t\t{}\nLast:\t\t{}",
        statistics.total,
        statistics.successful,
        statistics.failed,
        statistics.success_rate,
        moment(statistics.first_activity),
        moment(statistics.last_activity),
    )
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::daemon::storage::entities::{ActivityRecord, ActivityStatistics, Confidence};

    use super::{format_record, format_statistics};

    #[test]
    fn test_format_record() {
        let moment = Utc.with_ymd_and_hms(2025, 3, 15, 9, 0, 0).unwrap();
        let line = format_record(
            &ActivityRecord::succeeded(moment, "a.png".into(), "Writing tests".into(), Confidence::Medium),
            false,
        );
        assert!(line.ends_with("\tmedium\tWriting tests"));

        let line = format_record(&ActivityRecord::capture_failed(moment, "no display".into()), false);
        assert!(line.ends_with("\tfailed\tno display"));

        let coloured = format_record(&ActivityRecord::capture_failed(moment, "x".into()), true);
        assert!(coloured.contains("\u{1b}["));
    }

    #[test]
    fn test_format_statistics() {
        let moment = Utc.with_ymd_and_hms(2025, 3, 15, 9, 0, 0).unwrap();
        let records = vec![
            ActivityRecord::succeeded(moment, "a.png".into(), "a".into(), Confidence::High),
            ActivityRecord::capture_failed(moment, "x".into()),
            ActivityRecord::capture_failed(moment, "x".into()),
        ];
        let text = format_statistics(&ActivityStatistics::from_records(&records));
        assert!(text.contains("Total:\t\t3"));
        assert!(text.contains("33.33%"));
    }
}
