//! LSP base-protocol framing.
//!
//! Every message on the wire is `Content-Length: N\r\n\r\n` followed by exactly
//! `N` bytes of UTF-8 JSON. Extra headers are accepted on input but never emitted.

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ClientError;

/// Frames larger than this are treated as a corrupt header.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

const CONTENT_LENGTH: &str = "content-length";

/// Errors produced while reading or writing a frame.
///
/// All of them are fatal to the connection: once framing is lost the byte
/// stream cannot be resynchronised.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("{0}")]
    Framing(String),

    #[error("invalid JSON body: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Framing(message) => ClientError::Framing { message },
            CodecError::Parse(e) => ClientError::Parse {
                message: e.to_string(),
            },
            CodecError::Io(e) => ClientError::Io(e),
        }
    }
}

/// Serialize a message into a complete frame.
pub fn encode(message: &Value) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one framed message and flush.
pub async fn write_message<W>(writer: &mut W, message: &Value) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// Returns `Ok(None)` on a clean end-of-stream between frames. An EOF inside a
/// header block or body is an I/O error.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Value>, CodecError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let Some(length) = read_headers(reader).await? else {
        return Ok(None);
    };

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    Ok(Some(serde_json::from_slice(&body)?))
}

async fn read_headers<R>(reader: &mut R) -> Result<Option<usize>, CodecError>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut content_length: Option<usize> = None;
    let mut seen_any = false;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            if seen_any {
                return Err(CodecError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside a header block",
                )));
            }
            return Ok(None);
        }
        seen_any = true;

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.is_empty() {
            break;
        }

        let Some((name, value)) = text.split_once(':') else {
            return Err(CodecError::Framing(format!("malformed header line: {:?}", text)));
        };
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let parsed = value.trim().parse::<usize>().map_err(|e| {
                CodecError::Framing(format!("invalid Content-Length {:?}: {}", value.trim(), e))
            })?;
            content_length = Some(parsed);
        }
    }

    match content_length {
        Some(length) if length > MAX_CONTENT_LENGTH => Err(CodecError::Framing(format!(
            "Content-Length {} exceeds limit of {} bytes",
            length, MAX_CONTENT_LENGTH
        ))),
        Some(length) => Ok(Some(length)),
        None => Err(CodecError::Framing(
            "missing Content-Length header".to_string(),
        )),
    }
}
