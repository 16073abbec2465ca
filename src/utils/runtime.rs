use anyhow::Result;

/// The host processes one request or one tick at a time, so a single thread is all it needs.
pub fn single_thread_runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}
