use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels `cancelation` on Ctrl-C. Returns early when something else cancels it first, for
/// example the browser closing the pipe.
///
/// Detached processes on Windows don't receive console signals, there the host relies on the
/// input closing.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => {},
    };
}
