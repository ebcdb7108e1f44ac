//! Newline-delimited JSON framing

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// A frame that could not be encoded or decoded
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message as one JSON line, newline included
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, FrameError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line; blank lines yield `None`
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<Option<T>, FrameError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(trimmed)?))
}

/// Read frames until the stream closes, handing each message to `on_message`
///
/// Malformed frames are logged and skipped.
pub(crate) async fn read_frames<R, T>(reader: R, peer: &str, mut on_message: impl FnMut(T) -> bool)
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // Connection closed
            Ok(_) => match decode_line::<T>(&line) {
                Ok(Some(message)) => {
                    if !on_message(message) {
                        break;
                    }
                }
                Ok(None) => continue,
                Err(e) => log::warn!("Dropping frame from {}: {}", peer, e),
            },
            Err(e) => {
                log::error!("Read error from {}: {}", peer, e);
                break;
            }
        }
    }
}

/// Write queued messages until the queue closes or the socket fails
pub(crate) async fn write_frames<W, T>(mut writer: W, peer: String, mut queue: mpsc::UnboundedReceiver<T>)
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    while let Some(message) = queue.recv().await {
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to encode message for {}: {}", peer, e);
                continue;
            }
        };

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            log::error!("Write error to {}: {}", peer, e);
            break;
        }
        if let Err(e) = writer.flush().await {
            log::error!("Flush error to {}: {}", peer, e);
            break;
        }
    }
}
