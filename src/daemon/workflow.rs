use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    analysis::{
        prompt::{recent_context, summary_prompt, CONTEXT_RECORDS},
        Analyzer, PromptConfig,
    },
    capture::ScreenshotTaker,
    error::RecorderError,
    settings::Settings,
};

use super::storage::{activity_store::ActivityStore, entities::ActivityRecord};

/// Runs capture, analysis and storage for a single tick. Bridges [ScreenshotTaker],
/// [Analyzer] and [ActivityStore].
pub struct CaptureWorkflow {
    taker: ScreenshotTaker,
    analyzer: Box<dyn Analyzer>,
}

impl CaptureWorkflow {
    pub fn new(taker: ScreenshotTaker, analyzer: Box<dyn Analyzer>) -> Self {
        Self { taker, analyzer }
    }

    /// Produces and stores the record of one cycle. Capture and analysis failures still yield a
    /// stored record. Only a failed write is an error, in which case nothing was added.
    #[instrument(skip_all, fields(%timestamp))]
    pub async fn run_cycle<S: ActivityStore>(
        &mut self,
        store: &mut S,
        settings: &Settings,
        timestamp: DateTime<Utc>,
    ) -> Result<ActivityRecord, RecorderError> {
        let record = self.produce_record(&*store, settings, timestamp).await;

        store
            .append(record.clone())
            .await
            .map_err(RecorderError::storage)?;

        if settings.auto_cleanup {
            if let Err(e) = store
                .prune(settings.retention_days, settings.max_screenshots, timestamp)
                .await
            {
                warn!("Cleanup after capture failed {e:?}");
            }
        }

        match &record.error {
            None => info!("Cycle finished"),
            Some(e) => warn!("Cycle finished with an error: {e}"),
        }
        Ok(record)
    }

    async fn produce_record<S: ActivityStore>(
        &mut self,
        store: &S,
        settings: &Settings,
        timestamp: DateTime<Utc>,
    ) -> ActivityRecord {
        let screenshot = match self.taker.capture(timestamp) {
            Ok(v) => v,
            Err(e) => return ActivityRecord::capture_failed(timestamp, e.to_string()),
        };

        debug!(
            "Analyzing {}x{} screenshot {:?}",
            screenshot.width, screenshot.height, screenshot.relative_path
        );
        let context = recent_context(&store.recent_described(CONTEXT_RECORDS));
        let config = PromptConfig::from_settings(settings, context.as_deref());

        match self.analyzer.analyze(&screenshot.absolute_path, &config).await {
            Ok(analysis) => ActivityRecord::succeeded(
                timestamp,
                screenshot.relative_path,
                analysis.description,
                analysis.confidence,
            ),
            Err(e) => ActivityRecord::analysis_failed(timestamp, screenshot.relative_path, e.to_string()),
        }
    }

    /// Asks the summary model about `records`, which were selected for `start..=end`.
    pub async fn summarize(
        &self,
        settings: &Settings,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        records: &[ActivityRecord],
    ) -> Result<String, RecorderError> {
        let config =
            PromptConfig::for_summary(settings, summary_prompt(query, start, end, records));
        self.analyzer.summarize(&config).await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Result};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use image::RgbaImage;
    use tempfile::tempdir;

    use crate::{
        analysis::{Analysis, MockAnalyzer},
        capture::{MockScreenGrabber, ScreenshotTaker},
        daemon::storage::{
            activity_store::{ActivityStore, JsonActivityStore},
            entities::{ActivityRecord, Confidence},
        },
        error::RecorderError,
        settings::Settings,
        utils::{dir::AppPaths, logging::TEST_LOGGING},
    };

    use super::CaptureWorkflow;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 20, 9, 0, 0).unwrap()
    }

    fn working_grabber() -> MockScreenGrabber {
        let mut grabber = MockScreenGrabber::new();
        grabber
            .expect_grab()
            .returning(|| Ok(RgbaImage::new(8, 8)));
        grabber
    }

    fn workflow(paths: &AppPaths, grabber: MockScreenGrabber, analyzer: MockAnalyzer) -> CaptureWorkflow {
        CaptureWorkflow::new(
            ScreenshotTaker::new(Box::new(grabber), paths.clone()),
            Box::new(analyzer),
        )
    }

    #[tokio::test]
    async fn test_successful_cycle_uses_recent_context() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().into());
        let mut store = JsonActivityStore::open(&paths, start()).await?;

        let mut analyzer = MockAnalyzer::new();
        let mut sequence = mockall::Sequence::new();
        analyzer
            .expect_analyze()
            .withf(|path, config| path.exists() && !config.prompt.contains("Recent activities"))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| {
                Ok(Analysis {
                    description: "Writing a design document".into(),
                    confidence: Confidence::Medium,
                })
            });
        analyzer
            .expect_analyze()
            .withf(|_, config| config.prompt.contains("Writing a design document"))
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| {
                Ok(Analysis {
                    description: "Reviewing comments".into(),
                    confidence: Confidence::High,
                })
            });

        let mut workflow = workflow(&paths, working_grabber(), analyzer);
        let settings = Settings::default();
        let first = workflow.run_cycle(&mut store, &settings, start()).await?;
        let second = workflow
            .run_cycle(&mut store, &settings, start() + Duration::minutes(3))
            .await?;

        assert!(first.successful && second.successful);
        assert_eq!(first.confidence, Some(Confidence::Medium));
        assert_eq!(store.list(10, None), vec![second, first]);
        Ok(())
    }

    #[tokio::test]
    async fn test_context_reaches_past_failed_cycles() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().into());
        let mut store = JsonActivityStore::open(&paths, start()).await?;
        store
            .append(ActivityRecord::succeeded(
                start(),
                "screenshots/a.png".into(),
                "Planning the sprint".into(),
                Confidence::High,
            ))
            .await?;
        for i in 1..=6 {
            store
                .append(ActivityRecord::capture_failed(
                    start() + Duration::minutes(i),
                    "no display".into(),
                ))
                .await?;
        }

        let mut analyzer = MockAnalyzer::new();
        analyzer
            .expect_analyze()
            .withf(|_, config| config.prompt.contains("Planning the sprint"))
            .times(1)
            .returning(|_, _| {
                Ok(Analysis {
                    description: "Back at the desk".into(),
                    confidence: Confidence::Low,
                })
            });

        let record = workflow(&paths, working_grabber(), analyzer)
            .run_cycle(&mut store, &Settings::default(), start() + Duration::minutes(10))
            .await?;
        assert!(record.successful);
        Ok(())
    }

    #[tokio::test]
    async fn test_capture_failure_skips_analysis() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().into());
        let mut store = JsonActivityStore::open(&paths, start()).await?;

        let mut grabber = MockScreenGrabber::new();
        grabber
            .expect_grab()
            .returning(|| Err(anyhow!("permission denied")));
        let mut analyzer = MockAnalyzer::new();
        analyzer.expect_analyze().never();

        let record = workflow(&paths, grabber, analyzer)
            .run_cycle(&mut store, &Settings::default(), start())
            .await?;

        assert!(!record.successful);
        assert_eq!(record.screenshot_path, None);
        assert_eq!(record.confidence, None);
        assert!(record.error.unwrap().contains("permission denied"));
        assert_eq!(store.statistics().failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_analysis_failure_keeps_screenshot() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().into());
        let mut store = JsonActivityStore::open(&paths, start()).await?;

        let mut analyzer = MockAnalyzer::new();
        analyzer
            .expect_analyze()
            .returning(|_, _| Err(RecorderError::analysis("Request to the model timed out")));

        let record = workflow(&paths, working_grabber(), analyzer)
            .run_cycle(&mut store, &Settings::default(), start())
            .await?;

        assert!(!record.successful);
        assert_eq!(record.confidence, Some(Confidence::Low));
        assert_eq!(record.description, None);
        let screenshot = record.screenshot_path.unwrap();
        assert!(dir.path().join(screenshot).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_write_adds_nothing() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().into());
        let mut store = JsonActivityStore::open(&paths, start()).await?;

        // A directory in place of the document makes the write fail.
        tokio::fs::remove_file(paths.activity_log()).await?;
        tokio::fs::create_dir(paths.activity_log()).await?;

        let mut analyzer = MockAnalyzer::new();
        analyzer.expect_analyze().returning(|_, _| {
            Ok(Analysis {
                description: "Coding".into(),
                confidence: Confidence::High,
            })
        });

        let result = workflow(&paths, working_grabber(), analyzer)
            .run_cycle(&mut store, &Settings::default(), start())
            .await;

        assert!(matches!(result, Err(RecorderError::StorageWriteFailed(_))));
        assert!(store.list(10, None).is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_auto_cleanup_drops_old_records() -> Result<()> {
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().into());
        let mut store = JsonActivityStore::open(&paths, start()).await?;

        let mut analyzer = MockAnalyzer::new();
        analyzer.expect_analyze().returning(|_, _| {
            Ok(Analysis {
                description: "Coding".into(),
                confidence: Confidence::High,
            })
        });
        let mut workflow = workflow(&paths, working_grabber(), analyzer);

        let settings = Settings {
            retention_days: 1,
            ..Default::default()
        };
        workflow.run_cycle(&mut store, &settings, start()).await?;
        workflow
            .run_cycle(&mut store, &settings, start() + Duration::days(3))
            .await?;

        let records = store.list(10, None);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, start() + Duration::days(3));
        Ok(())
    }
}
