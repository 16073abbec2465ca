//! Moves requests and responses between the browser (or a terminal) and the dispatcher.
//!
//! Native messaging frames every message with a 4 byte length in native byte order. The
//! `--lines` mode uses one JSON document per line, which is easier to drive by hand.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Browsers refuse messages from the host above this size.
pub const MAX_OUTGOING_MESSAGE: usize = 1024 * 1024;
/// Browsers never send more than this.
pub const MAX_INCOMING_MESSAGE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Native,
    Lines,
}

/// Reads the next message. `None` means the other side closed the stream.
pub async fn read_message<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    framing: Framing,
) -> Result<Option<Vec<u8>>> {
    match framing {
        Framing::Native => {
            let mut length = [0u8; 4];
            match reader.read_exact(&mut length).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e).context("Failed to read message length"),
            }
            let length = u32::from_ne_bytes(length) as usize;
            if length > MAX_INCOMING_MESSAGE {
                // Skip the payload so that the next frame can still be read.
                tokio::io::copy(&mut (&mut *reader).take(length as u64), &mut tokio::io::sink())
                    .await?;
                bail!("Incoming message of {length} bytes exceeds the limit of {MAX_INCOMING_MESSAGE}");
            }
            let mut message = vec![0u8; length];
            reader
                .read_exact(&mut message)
                .await
                .context("Stream ended in the middle of a message")?;
            Ok(Some(message))
        }
        Framing::Lines => loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            if !line.trim().is_empty() {
                return Ok(Some(line.trim().as_bytes().to_vec()));
            }
        },
    }
}

/// Writes one message and flushes it. Native responses above [MAX_OUTGOING_MESSAGE] are replaced
/// by an error response for the same command.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    framing: Framing,
    message: &Value,
) -> Result<()> {
    let mut data = serde_json::to_vec(message)?;
    match framing {
        Framing::Native => {
            if data.len() > MAX_OUTGOING_MESSAGE {
                warn!("Response of {} bytes is too large", data.len());
                data = serde_json::to_vec(&json!({
                    "command": message.get("command"),
                    "success": false,
                    "error": format!(
                        "Response of {} bytes exceeds the {MAX_OUTGOING_MESSAGE} byte limit, request fewer activities",
                        data.len()
                    ),
                }))?;
            }
            let length = u32::try_from(data.len())?;
            writer.write_all(&length.to_ne_bytes()).await?;
            writer.write_all(&data).await?;
        }
        Framing::Lines => {
            data.push(b'\n');
            writer.write_all(&data).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}

/// Forwards incoming messages to the dispatcher. Returning closes the request channel, which lets
/// the dispatcher finish the queued requests and stop.
pub async fn read_requests<R: AsyncBufRead + Unpin>(
    mut reader: R,
    framing: Framing,
    requests: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        let message = select! {
            _ = shutdown.cancelled() => return Ok(()),
            message = read_message(&mut reader, framing) => message,
        };
        match message {
            Ok(Some(message)) => {
                debug!("Received {} bytes", message.len());
                if requests.send(message).await.is_err() {
                    return Ok(());
                }
            }
            Ok(None) => {
                info!("Input closed");
                return Ok(());
            }
            Err(e) => {
                error!("Failed to read request {e:?}");
                // A broken stream can't be resynchronized, an oversized message already was.
                if e.downcast_ref::<std::io::Error>().is_some() {
                    return Err(e);
                }
            }
        }
    }
}

pub async fn write_responses<W: AsyncWrite + Unpin>(
    mut writer: W,
    framing: Framing,
    mut responses: mpsc::Receiver<Value>,
) -> Result<()> {
    while let Some(response) = responses.recv().await {
        write_message(&mut writer, framing, &response).await?;
    }
    Ok(())
}
