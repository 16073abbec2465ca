use std::{
    collections::HashSet,
    future::Future,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    fs::operations::{
        list_files_with_extension, read_locked, remove_if_exists, replace_atomically,
        ExclusiveLock,
    },
    utils::dir::AppPaths,
};

use super::entities::{
    ActivityExport, ActivityLog, ActivityRecord, ActivityStatistics, PruneReport,
};

/// Interface over the activity history. Reads are served from memory, writes go through to disk
/// before they become visible.
pub trait ActivityStore {
    /// Adds a record in timestamp order and rewrites the document.
    fn append(&mut self, record: ActivityRecord) -> impl Future<Output = Result<()>>;

    /// Newest first, at most `limit` records. With a date only records of that UTC day are
    /// considered.
    fn list(&self, limit: usize, date: Option<NaiveDate>) -> Vec<ActivityRecord>;

    /// The `count` newest records that carry a description.
    fn recent_described(&self, count: usize) -> Vec<ActivityRecord>;

    /// Records with `start <= timestamp <= end`, oldest first.
    fn query_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<ActivityRecord>;

    fn statistics(&self) -> ActivityStatistics;

    /// Drops records older than `retention_days` and keeps at most `max_screenshots` screenshot
    /// files on disk.
    fn prune(
        &mut self,
        retention_days: u32,
        max_screenshots: usize,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<PruneReport>>;
}

/// The main realization of [ActivityStore]: a single pretty-printed JSON document that is
/// rewritten as a whole on every change. Changes are applied to the document on disk under an
/// exclusive lock, so several processes can share one application directory.
pub struct JsonActivityStore {
    log_path: PathBuf,
    root: PathBuf,
    screenshot_dir: PathBuf,
    log: ActivityLog,
}

impl JsonActivityStore {
    /// Loads the document, creating it when missing. A document that can't be parsed is moved
    /// aside so that it isn't overwritten by the fresh log.
    #[instrument(skip(paths))]
    pub async fn open(paths: &AppPaths, now: DateTime<Utc>) -> Result<Self> {
        let log_path = paths.activity_log();
        let screenshot_dir = paths.screenshots();
        tokio::fs::create_dir_all(&screenshot_dir)
            .await
            .with_context(|| format!("Failed to create {screenshot_dir:?}"))?;

        let existing = read_locked(&log_path).await?;
        let (log, needs_write) = match existing {
            None => (ActivityLog::new(now), true),
            Some(data) => match serde_json::from_slice::<ActivityLog>(&data) {
                Ok(log) => (log, false),
                Err(e) => {
                    let aside = log_path.with_file_name(format!(
                        "activity_log.json.corrupt-{}",
                        now.format("%Y%m%d%H%M%S")
                    ));
                    warn!("Activity log is corrupted ({e}), moving it to {aside:?}");
                    tokio::fs::rename(&log_path, &aside).await?;
                    (ActivityLog::new(now), true)
                }
            },
        };

        let store = Self {
            log_path,
            root: paths.root().to_path_buf(),
            screenshot_dir,
            log,
        };
        if needs_write {
            store.save(&store.log).await?;
        }
        let inconsistent = store.log.activities.iter().filter(|v| !v.is_consistent()).count();
        if inconsistent > 0 {
            warn!("{inconsistent} activities have a success flag that contradicts their content");
        }
        debug!("Loaded {} activities", store.log.activities.len());
        Ok(store)
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    async fn save(&self, log: &ActivityLog) -> Result<()> {
        let data = serde_json::to_vec_pretty(log)?;
        replace_atomically(&self.log_path, &data)
            .await
            .with_context(|| format!("Failed to write {:?}", self.log_path))
    }

    /// Reads the document under `lock`. Falls back to the loaded copy when the file is gone or
    /// can't be parsed.
    async fn reload(&self, lock: &ExclusiveLock) -> Result<ActivityLog> {
        let Some(data) = lock.read().await? else {
            return Ok(self.log.clone());
        };
        match serde_json::from_slice::<ActivityLog>(&data) {
            Ok(log) => Ok(log),
            Err(e) => {
                warn!("Activity log on disk can't be parsed ({e}), keeping the loaded copy");
                Ok(self.log.clone())
            }
        }
    }

    /// Applies `change` to the current document and writes it back when the number of records
    /// changed. The in-memory copy is only replaced once the write succeeded.
    async fn update<T>(&mut self, change: impl FnOnce(&mut ActivityLog) -> T) -> Result<T> {
        let lock = ExclusiveLock::acquire(&self.log_path).await?;
        let result = async {
            let mut log = self.reload(&lock).await?;
            let before = log.activities.len();
            let output = change(&mut log);
            if log.activities.len() != before {
                let data = serde_json::to_vec_pretty(&log)?;
                lock.replace(&data)
                    .await
                    .with_context(|| format!("Failed to write {:?}", self.log_path))?;
            }
            anyhow::Ok((log, output))
        }
        .await;
        lock.release().await?;

        let (log, output) = result?;
        self.log = log;
        Ok(output)
    }

    /// Writes the selected records into a standalone document.
    pub async fn export(
        &self,
        output: &Path,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let activities = match range {
            Some((start, end)) => self.query_range(start, end),
            None => self.log.activities.clone(),
        };
        let export = ActivityExport {
            exported_at: now,
            total_activities: activities.len(),
            activities,
        };
        let data = serde_json::to_vec_pretty(&export)?;
        tokio::fs::write(output, data)
            .await
            .with_context(|| format!("Failed to write export {output:?}"))?;
        info!("Exported {} activities to {output:?}", export.total_activities);
        Ok(export.total_activities)
    }

    /// Screenshots that survive a prune: the newest `max_screenshots` distinct files referenced
    /// by the remaining records.
    fn screenshots_to_keep(&self, records: &[ActivityRecord], max_screenshots: usize) -> HashSet<PathBuf> {
        let mut keep = HashSet::new();
        for path in records.iter().rev().filter_map(|v| v.screenshot_path.as_deref()) {
            if keep.len() >= max_screenshots {
                break;
            }
            keep.insert(self.resolve(path));
        }
        keep
    }
}

impl ActivityStore for JsonActivityStore {
    async fn append(&mut self, record: ActivityRecord) -> Result<()> {
        self.update(|log| {
            let at = log
                .activities
                .partition_point(|v| v.timestamp <= record.timestamp);
            log.activities.insert(at, record);
        })
        .await
    }

    fn list(&self, limit: usize, date: Option<NaiveDate>) -> Vec<ActivityRecord> {
        self.log
            .activities
            .iter()
            .rev()
            .filter(|v| date.map_or(true, |date| v.timestamp.date_naive() == date))
            .take(limit)
            .cloned()
            .collect()
    }

    fn recent_described(&self, count: usize) -> Vec<ActivityRecord> {
        self.log
            .activities
            .iter()
            .rev()
            .filter(|v| v.description.is_some())
            .take(count)
            .cloned()
            .collect()
    }

    fn query_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<ActivityRecord> {
        self.log
            .activities
            .iter()
            .filter(|v| start <= v.timestamp && v.timestamp <= end)
            .cloned()
            .collect()
    }

    fn statistics(&self) -> ActivityStatistics {
        ActivityStatistics::from_records(&self.log.activities)
    }

    #[instrument(skip(self))]
    async fn prune(
        &mut self,
        retention_days: u32,
        max_screenshots: usize,
        now: DateTime<Utc>,
    ) -> Result<PruneReport> {
        let cutoff = Duration::try_days(retention_days.into()).and_then(|v| now.checked_sub_signed(v));
        if cutoff.is_none() {
            warn!("Retention of {retention_days} days reaches past the calendar, keeping all records");
        }

        // The document is rewritten before files are touched. A crash in between leaves orphaned
        // screenshots, which the next prune picks up from the directory listing.
        let removed = self
            .update(|log| {
                let Some(cutoff) = cutoff else {
                    return vec![];
                };
                let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut log.activities)
                    .into_iter()
                    .partition(|v| v.timestamp >= cutoff);
                log.activities = kept;
                removed
            })
            .await?;

        let mut report = PruneReport {
            removed_records: removed.len(),
            removed_screenshots: 0,
        };

        let keep = self.screenshots_to_keep(&self.log.activities, max_screenshots);

        let mut candidates = list_files_with_extension(&self.screenshot_dir, "png").await?;
        candidates.extend(
            removed
                .iter()
                .filter_map(|v| v.screenshot_path.as_deref())
                .map(|v| self.resolve(v)),
        );

        let mut seen = HashSet::new();
        for path in candidates {
            if keep.contains(&path) || !seen.insert(path.clone()) {
                continue;
            }
            match remove_if_exists(&path).await {
                Ok(true) => report.removed_screenshots += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to remove screenshot: {e:?}"),
            }
        }

        if report != PruneReport::default() {
            info!(
                "Pruned {} records and {} screenshots",
                report.removed_records, report.removed_screenshots
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;

    use crate::{
        daemon::storage::entities::{ActivityRecord, Confidence},
        utils::dir::AppPaths,
    };

    use super::{ActivityStore, JsonActivityStore};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 7, 4, 12, 0, 0).unwrap()
    }

    fn record_at(timestamp: DateTime<Utc>, screenshot: Option<String>) -> ActivityRecord {
        match screenshot {
            Some(path) => {
                ActivityRecord::succeeded(timestamp, path, "Reading docs".into(), Confidence::High)
            }
            None => ActivityRecord::capture_failed(timestamp, "no display".into()),
        }
    }

    #[tokio::test]
    async fn test_open_creates_document() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        let store = JsonActivityStore::open(&paths, start()).await?;

        assert!(paths.activity_log().exists());
        assert!(paths.screenshots().is_dir());
        assert_eq!(store.log().created_at, start());
        assert!(store.log().activities.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_appends_survive_reload() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        let mut store = JsonActivityStore::open(&paths, start()).await?;
        for i in 0..7 {
            store
                .append(record_at(start() + Duration::minutes(i), None))
                .await?;
        }

        let reloaded = JsonActivityStore::open(&paths, start() + Duration::days(1)).await?;
        assert_eq!(reloaded.log().activities.len(), 7);
        assert_eq!(reloaded.log().created_at, start());
        assert_eq!(reloaded.log(), store.log());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_document_is_moved_aside() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        tokio::fs::write(paths.activity_log(), b"{\"createdAt\": ").await?;

        let store = JsonActivityStore::open(&paths, start()).await?;
        assert!(store.log().activities.is_empty());

        let aside = dir.path().join("activity_log.json.corrupt-20180704120000");
        assert_eq!(tokio::fs::read(aside).await?, b"{\"createdAt\": ");
        Ok(())
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit_and_date() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        let mut store = JsonActivityStore::open(&paths, start()).await?;
        for i in 0..6 {
            store
                .append(record_at(start() + Duration::hours(i * 6), None))
                .await?;
        }

        let recent = store.list(3, None);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, start() + Duration::hours(30));
        assert!(recent.windows(2).all(|v| v[0].timestamp > v[1].timestamp));

        let day = store.list(10, NaiveDate::from_ymd_opt(2018, 7, 5));
        assert_eq!(day.len(), 4);
        assert!(day.iter().all(|v| v.timestamp.date_naive() == NaiveDate::from_ymd_opt(2018, 7, 5).unwrap()));

        assert!(store.list(0, None).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_query_range_is_inclusive() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        let mut store = JsonActivityStore::open(&paths, start()).await?;
        let stamps = (0..20).map(|i| start() + Duration::minutes(i * 3)).collect::<Vec<_>>();
        for stamp in &stamps {
            store.append(record_at(*stamp, None)).await?;
        }

        let (a, b) = (stamps[4], stamps[11]);
        let found = store.query_range(a, b);
        let expected = stamps
            .iter()
            .filter(|v| a <= **v && **v <= b)
            .copied()
            .collect::<Vec<_>>();
        assert_eq!(
            found.iter().map(|v| v.timestamp).collect::<Vec<_>>(),
            expected
        );
        assert_eq!(found.len(), 8);
        assert!(store.query_range(b, a).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_by_age_and_count() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        let mut store = JsonActivityStore::open(&paths, start()).await?;

        // 80 records over 40 days, every one with a screenshot on disk.
        for i in 0..80 {
            let timestamp = start() + Duration::hours(i * 12);
            let name = format!("screenshot_{i:03}.png");
            tokio::fs::write(paths.screenshots().join(&name), b"png").await?;
            store
                .append(record_at(timestamp, Some(paths.relative_screenshot(&name))))
                .await?;
        }
        tokio::fs::write(paths.screenshots().join("orphan.png"), b"png").await?;

        let now = start() + Duration::days(40);
        let report = store.prune(30, 50, now).await?;

        let cutoff = now - Duration::days(30);
        assert!(store.log().activities.iter().all(|v| v.timestamp >= cutoff));
        assert_eq!(report.removed_records, 80 - store.log().activities.len());

        let on_disk = std::fs::read_dir(paths.screenshots())?.count();
        assert!(on_disk <= 50);
        assert_eq!(report.removed_screenshots, 81 - on_disk);

        // The newest screenshot is always kept.
        assert!(paths.screenshots().join("screenshot_079.png").exists());

        let reloaded = JsonActivityStore::open(&paths, now).await?;
        assert_eq!(reloaded.log(), store.log());
        Ok(())
    }

    #[tokio::test]
    async fn test_stores_sharing_a_directory_keep_all_records() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        let mut recorder = JsonActivityStore::open(&paths, start()).await?;
        let mut cli = JsonActivityStore::open(&paths, start()).await?;

        recorder.append(record_at(start(), None)).await?;
        cli.append(record_at(start() + Duration::minutes(2), None)).await?;
        recorder
            .append(record_at(start() + Duration::minutes(1), None))
            .await?;

        let reloaded = JsonActivityStore::open(&paths, start()).await?;
        assert_eq!(reloaded.log().activities.len(), 3);
        assert_eq!(reloaded.log(), recorder.log());
        assert!(reloaded
            .log()
            .activities
            .windows(2)
            .all(|v| v[0].timestamp <= v[1].timestamp));

        // A prune from the stale store keeps what the other one wrote.
        let report = cli.prune(30, 50, start() + Duration::days(1)).await?;
        assert_eq!(report.removed_records, 0);
        assert_eq!(cli.log().activities.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_with_huge_retention_keeps_everything() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        let mut store = JsonActivityStore::open(&paths, start()).await?;
        store.append(record_at(start(), None)).await?;

        let report = store.prune(u32::MAX, 50, start() + Duration::days(1)).await?;
        assert_eq!(report.removed_records, 0);
        assert_eq!(store.log().activities.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_recent_described_skips_failures() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        let mut store = JsonActivityStore::open(&paths, start()).await?;
        for i in 0..4 {
            store
                .append(record_at(start() + Duration::minutes(i), Some(format!("screenshots/{i}.png"))))
                .await?;
        }
        for i in 4..10 {
            store.append(record_at(start() + Duration::minutes(i), None)).await?;
        }

        let recent = store.recent_described(3);
        assert_eq!(
            recent.iter().map(|v| v.timestamp).collect::<Vec<_>>(),
            vec![
                start() + Duration::minutes(3),
                start() + Duration::minutes(2),
                start() + Duration::minutes(1),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_export_range() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());
        let mut store = JsonActivityStore::open(&paths, start()).await?;
        for i in 0..4 {
            store.append(record_at(start() + Duration::days(i), None)).await?;
        }

        let output = dir.path().join("export.json");
        let count = store
            .export(
                &output,
                Some((start() + Duration::days(1), start() + Duration::days(2))),
                start(),
            )
            .await?;
        assert_eq!(count, 2);

        let value: serde_json::Value = serde_json::from_slice(&tokio::fs::read(&output).await?)?;
        assert_eq!(value["totalActivities"], 2);
        assert_eq!(value["activities"].as_array().map(Vec::len), Some(2));
        Ok(())
    }
}
