use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::{
    analysis::prompt::DEFAULT_SUMMARY_QUERY,
    error::{RecorderError, StateError},
    settings::{validate_interval, SettingsPatch, SettingsStore},
    utils::{clock::SharedClock, time::deserialize_timestamp},
};

use super::{
    scheduler::Ticker,
    session::SessionState,
    storage::{activity_store::ActivityStore, entities::ActivityRecord},
    workflow::CaptureWorkflow,
};

const DEFAULT_ACTIVITY_LIMIT: usize = 10;

const COMMAND_NAMES: [&str; 8] = [
    "start_recording",
    "stop_recording",
    "capture_now",
    "get_activities",
    "get_status",
    "update_settings",
    "get_statistics",
    "query_time_range",
];

/// A request from the extension or the CLI, selected by its `command` field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    StartRecording {
        #[serde(default)]
        interval: Option<u64>,
    },
    StopRecording,
    CaptureNow,
    GetActivities {
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    GetStatus,
    UpdateSettings {
        #[serde(default)]
        settings: SettingsPatch,
    },
    GetStatistics,
    QueryTimeRange {
        #[serde(alias = "startTime", deserialize_with = "deserialize_timestamp")]
        start_time: DateTime<Utc>,
        #[serde(alias = "endTime", deserialize_with = "deserialize_timestamp")]
        end_time: DateTime<Utc>,
        #[serde(default)]
        query: Option<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::StartRecording { .. } => "start_recording",
            Command::StopRecording => "stop_recording",
            Command::CaptureNow => "capture_now",
            Command::GetActivities { .. } => "get_activities",
            Command::GetStatus => "get_status",
            Command::UpdateSettings { .. } => "update_settings",
            Command::GetStatistics => "get_statistics",
            Command::QueryTimeRange { .. } => "query_time_range",
        }
    }

    /// Parses a raw request. On failure the command name is returned when one could be read, so
    /// that the error response can still echo it.
    pub fn parse(raw: &[u8]) -> Result<Self, (Option<String>, RecorderError)> {
        let value = serde_json::from_slice::<Value>(raw).map_err(|e| {
            (None, RecorderError::InvalidCommand(format!("malformed JSON: {e}")))
        })?;
        let name = match value.get("command") {
            Some(Value::String(name)) => name.clone(),
            Some(_) => {
                return Err((
                    None,
                    RecorderError::InvalidCommand("`command` must be a string".into()),
                ))
            }
            None => {
                return Err((
                    None,
                    RecorderError::InvalidCommand("missing `command` field".into()),
                ))
            }
        };
        if !COMMAND_NAMES.contains(&name.as_str()) {
            return Err((Some(name.clone()), RecorderError::UnknownCommand(name)));
        }
        serde_json::from_value(value)
            .map_err(|e| (Some(name), RecorderError::InvalidCommand(e.to_string())))
    }
}

fn success(command: Option<&str>, payload: Value) -> Value {
    let mut response = Map::new();
    response.insert("command".into(), json!(command));
    response.insert("success".into(), Value::Bool(true));
    if let Value::Object(payload) = payload {
        response.extend(payload);
    }
    Value::Object(response)
}

pub fn failure(command: Option<&str>, error: &RecorderError) -> Value {
    json!({
        "command": command,
        "success": false,
        "error": error.to_string(),
    })
}

/// Owns the session and handles one command or one scheduled cycle at a time.
pub struct Dispatcher<S: ActivityStore> {
    workflow: CaptureWorkflow,
    store: S,
    settings: SettingsStore,
    session: SessionState,
    ticker: Ticker,
    clock: SharedClock,
}

enum Event {
    Shutdown,
    Request(Option<Vec<u8>>),
    Tick,
}

impl<S: ActivityStore> Dispatcher<S> {
    pub fn new(
        workflow: CaptureWorkflow,
        store: S,
        settings: SettingsStore,
        clock: SharedClock,
    ) -> Self {
        Self {
            workflow,
            store,
            settings,
            session: SessionState::new(),
            ticker: Ticker::idle(),
            clock,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Parses and handles a raw request. Always produces a response.
    pub async fn handle_raw(&mut self, raw: &[u8]) -> Value {
        match Command::parse(raw) {
            Ok(command) => self.handle(command).await,
            Err((name, e)) => {
                warn!("Rejected request: {e}");
                failure(name.as_deref(), &e)
            }
        }
    }

    pub async fn handle(&mut self, command: Command) -> Value {
        let name = command.name();
        let span = info_span!("command", command = name);
        match self.execute(command).instrument(span).await {
            Ok(payload) => success(Some(name), payload),
            Err(e) => {
                warn!("Command {name} failed: {e}");
                failure(Some(name), &e)
            }
        }
    }

    async fn execute(&mut self, command: Command) -> Result<Value, RecorderError> {
        debug!("Executing {command:?}");
        match command {
            Command::StartRecording { interval } => self.start_recording(interval),
            Command::StopRecording => {
                self.session.stop()?;
                self.ticker.stop();
                info!("Recording stopped");
                Ok(json!({}))
            }
            Command::CaptureNow => {
                let record = self.run_cycle().await?;
                Ok(json!({ "activity": record }))
            }
            Command::GetActivities { limit, date } => {
                let activities = self
                    .store
                    .list(limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT), date);
                Ok(json!({ "count": activities.len(), "activities": activities }))
            }
            Command::GetStatus => Ok(self.status()),
            Command::UpdateSettings { settings } => self.update_settings(settings).await,
            Command::GetStatistics => Ok(json!({ "statistics": self.store.statistics() })),
            Command::QueryTimeRange {
                start_time,
                end_time,
                query,
            } => self.query_time_range(start_time, end_time, query).await,
        }
    }

    fn start_recording(&mut self, interval: Option<u64>) -> Result<Value, RecorderError> {
        if self.session.is_recording() {
            return Err(StateError::AlreadyRecording.into());
        }
        let interval = validate_interval(interval.unwrap_or(self.settings.get().interval))?;
        self.session.start(interval, self.clock.time())?;
        self.ticker
            .start(Duration::from_secs(interval), self.clock.instant());
        info!("Recording started with an interval of {interval}s");
        Ok(json!({ "interval": interval }))
    }

    fn status(&self) -> Value {
        let interval = self
            .session
            .interval()
            .unwrap_or(self.settings.get().interval);
        json!({
            "isRecording": self.session.is_recording(),
            "interval": interval,
            "lastCapture": self.session.last_capture(),
            "session": self.session.summary(),
            "statistics": self.store.statistics(),
        })
    }

    /// The new values are written to disk before they are used. A running schedule keeps its
    /// period, new intervals apply to the next `start_recording`.
    async fn update_settings(&mut self, patch: SettingsPatch) -> Result<Value, RecorderError> {
        let (merged, updated) = patch.merge(self.settings.get())?;
        self.settings
            .replace(merged)
            .await
            .map_err(RecorderError::storage)?;
        info!("Updated settings {updated:?}");
        let ignored = patch.ignored();
        if !ignored.is_empty() {
            warn!("Ignored settings {ignored:?}, API keys are read from the `apiKeyEnv` variable");
        }
        Ok(json!({
            "settings": self.settings.get(),
            "updated": updated,
            "ignored": ignored,
        }))
    }

    async fn query_time_range(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        query: Option<String>,
    ) -> Result<Value, RecorderError> {
        if start > end {
            return Err(RecorderError::InvalidCommand(
                "start_time must not be after end_time".into(),
            ));
        }
        let records = self.store.query_range(start, end);
        let time_range = json!({ "start": start, "end": end });
        if records.is_empty() {
            return Ok(json!({
                "summary": "No activities were recorded in this time range.",
                "activitiesCount": 0,
                "timeRange": time_range,
            }));
        }

        let query = query
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SUMMARY_QUERY.to_string());
        let summary = self
            .workflow
            .summarize(self.settings.get(), &query, start, end, &records)
            .await?;
        Ok(json!({
            "summary": summary,
            "activitiesCount": records.len(),
            "timeRange": time_range,
        }))
    }

    /// Session counters only change once the record is stored.
    async fn run_cycle(&mut self) -> Result<ActivityRecord, RecorderError> {
        let timestamp = self.clock.time();
        let record = self
            .workflow
            .run_cycle(&mut self.store, self.settings.get(), timestamp)
            .await?;
        self.session.record_cycle(&record);
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn tick(&mut self) {
        if let Err(e) = self.run_cycle().await {
            error!("Scheduled capture failed {e}");
        }
        self.ticker.complete(self.clock.instant());
    }

    /// Event loop of the host. Ends on shutdown or once the request channel closes.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<Vec<u8>>,
        responses: mpsc::Sender<Value>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("Dispatcher started");
        loop {
            let event = select! {
                _ = shutdown.cancelled() => Event::Shutdown,
                request = requests.recv() => Event::Request(request),
                _ = self.ticker.wait(self.clock.as_ref()) => Event::Tick,
            };

            match event {
                Event::Shutdown => break,
                Event::Request(None) => {
                    info!("Request channel closed");
                    break;
                }
                Event::Request(Some(raw)) => {
                    let response = self.handle_raw(&raw).await;
                    if responses.send(response).await.is_err() {
                        warn!("Response channel closed");
                        break;
                    }
                }
                Event::Tick => self.tick().await,
            }
        }
        info!("Dispatcher stopped");
        Ok(())
    }
}
