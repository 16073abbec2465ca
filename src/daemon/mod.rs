use anyhow::{anyhow, Result};
use dispatcher::{Command, Dispatcher};
use serde_json::Value;
use storage::activity_store::{ActivityStore, JsonActivityStore};
use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use transport::Framing;
use workflow::CaptureWorkflow;

use crate::{
    analysis::dashscope::DashScopeAnalyzer,
    capture::{default_grabber, ScreenshotTaker},
    settings::SettingsStore,
    utils::{
        clock::{default_clock, SharedClock},
        dir::AppPaths,
    },
};

pub mod args;
pub mod dispatcher;
pub mod scheduler;
pub mod session;
pub mod shutdown;
pub mod storage;
pub mod transport;
pub mod workflow;

const CHANNEL_CAPACITY: usize = 16;

/// Builds a dispatcher over the real screen, model and files in `paths`.
pub async fn create_dispatcher(
    paths: &AppPaths,
    clock: SharedClock,
) -> Result<Dispatcher<JsonActivityStore>> {
    let settings = SettingsStore::load(paths.settings()).await?;
    let store = JsonActivityStore::open(paths, clock.time()).await?;
    let workflow = CaptureWorkflow::new(
        ScreenshotTaker::new(default_grabber(), paths.clone()),
        Box::new(DashScopeAnalyzer::new()?),
    );
    Ok(Dispatcher::new(workflow, store, settings, clock))
}

/// Connects a dispatcher to a message stream until the input ends or `shutdown` fires. Requests
/// already read are answered before returning when the input ends.
pub async fn serve<R, W, S>(
    reader: R,
    writer: W,
    framing: Framing,
    dispatcher: Dispatcher<S>,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    S: ActivityStore,
{
    let (request_sender, requests) = mpsc::channel::<Vec<u8>>(CHANNEL_CAPACITY);
    let (response_sender, responses) = mpsc::channel::<Value>(CHANNEL_CAPACITY);

    let (reader_result, dispatcher_result, writer_result) = tokio::join!(
        transport::read_requests(BufReader::new(reader), framing, request_sender, shutdown.clone()),
        dispatcher.run(requests, response_sender, shutdown.clone()),
        transport::write_responses(writer, framing, responses),
    );

    if let Err(e) = reader_result {
        error!("Reader got an error {:?}", e);
    }
    if let Err(e) = writer_result {
        error!("Writer got an error {:?}", e);
    }
    dispatcher_result
}

/// Represents the starting point for the messaging host: requests on stdin, responses on stdout.
pub async fn start_daemon(paths: AppPaths, framing: Framing) -> Result<()> {
    let dispatcher = create_dispatcher(&paths, default_clock()).await?;
    let shutdown_token = CancellationToken::new();

    info!("Serving {framing:?} messages from {:?}", paths.root());
    let (_, result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        async {
            let result = serve(
                tokio::io::stdin(),
                tokio::io::stdout(),
                framing,
                dispatcher,
                shutdown_token.clone(),
            )
            .await;
            // The browser closed the pipe, nothing is left to wait for.
            shutdown_token.cancel();
            result
        },
    );
    result
}

/// Records on a schedule without a message channel, until interrupted.
pub async fn start_recorder(paths: AppPaths, interval: Option<u64>) -> Result<()> {
    let mut dispatcher = create_dispatcher(&paths, default_clock()).await?;

    let response = dispatcher.handle(Command::StartRecording { interval }).await;
    if response["success"] != Value::Bool(true) {
        return Err(anyhow!("Failed to start recording: {}", response["error"]));
    }

    let shutdown_token = CancellationToken::new();
    // Nothing is ever sent, the channels only need to stay open.
    let (_request_sender, requests) = mpsc::channel(1);
    let (response_sender, _responses) = mpsc::channel(1);

    let (_, result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        dispatcher.run(requests, response_sender, shutdown_token.clone()),
    );
    result
}

#[cfg(test)]
mod daemon_tests {
    use anyhow::Result;
    use chrono::Utc;
    use image::RgbaImage;
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::sync::CancellationToken;

    use crate::{
        analysis::{Analysis, MockAnalyzer},
        capture::{MockScreenGrabber, ScreenshotTaker},
        daemon::{
            dispatcher::Dispatcher, serve, storage::activity_store::JsonActivityStore,
            storage::entities::Confidence, transport::Framing, workflow::CaptureWorkflow,
        },
        settings::SettingsStore,
        utils::{clock::default_clock, dir::AppPaths, logging::TEST_LOGGING},
    };

    fn frame(message: &Value) -> Vec<u8> {
        let body = message.to_string().into_bytes();
        let mut data = (body.len() as u32).to_ne_bytes().to_vec();
        data.extend(body);
        data
    }

    fn unframe(mut data: &[u8]) -> Vec<Value> {
        let mut messages = vec![];
        while data.len() >= 4 {
            let length = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]) as usize;
            messages.push(serde_json::from_slice(&data[4..4 + length]).unwrap());
            data = &data[4 + length..];
        }
        messages
    }

    /// Drives the host over native framing the way a browser would, then closes the input.
    #[tokio::test]
    async fn smoke_test_host() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let paths = AppPaths::new(dir.path().to_path_buf());

        let mut grabber = MockScreenGrabber::new();
        grabber
            .expect_grab()
            .returning(|| Ok(RgbaImage::new(16, 9)));
        let mut analyzer = MockAnalyzer::new();
        analyzer.expect_analyze().times(1).returning(|_, _| {
            Ok(Analysis {
                description: "Reading the tokio docs".into(),
                confidence: Confidence::High,
            })
        });

        let dispatcher = Dispatcher::new(
            CaptureWorkflow::new(
                ScreenshotTaker::new(Box::new(grabber), paths.clone()),
                Box::new(analyzer),
            ),
            JsonActivityStore::open(&paths, Utc::now()).await?,
            SettingsStore::load(paths.settings()).await?,
            default_clock(),
        );

        let (mut browser_in, host_in) = tokio::io::duplex(4096);
        let (host_out, mut browser_out) = tokio::io::duplex(64 * 1024);
        let shutdown = CancellationToken::new();

        let (result, written) = tokio::join!(
            serve(host_in, host_out, Framing::Native, dispatcher, shutdown.clone()),
            async {
                for request in [
                    json!({ "command": "capture_now" }),
                    json!({ "command": "get_status" }),
                    json!({ "command": "launch_rockets" }),
                ] {
                    browser_in.write_all(&frame(&request)).await?;
                }
                drop(browser_in);
                let mut written = vec![];
                browser_out.read_to_end(&mut written).await?;
                anyhow::Ok(written)
            }
        );
        result?;

        let responses = unframe(&written?);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["command"], json!("capture_now"));
        assert_eq!(
            responses[0]["activity"]["description"],
            json!("Reading the tokio docs")
        );
        assert_eq!(responses[1]["isRecording"], json!(false));
        assert_eq!(responses[1]["statistics"]["total"], json!(1));
        assert_eq!(responses[2]["error"], json!("Unknown command: launch_rockets"));
        Ok(())
    }
}
