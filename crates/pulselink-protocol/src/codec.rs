//! Length-prefixed message codec.
//!
//! Every message is framed as a 4-byte big-endian payload length followed by
//! the UTF-8 JSON payload:
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  JSON payload    |
//! +----------------+------------------+
//! ```
//!
//! The length is read from the frame itself, so payload content (including
//! NUL bytes inside strings) can never cut a message short.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::Message;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Encodes a message into a complete frame.
///
/// ```rust
/// use pulselink_protocol::{Message, decode, encode};
/// use serde_json::json;
///
/// let message = Message::request(1, "GET_SETTINGS", json!({}));
/// let frame = encode(&message).unwrap();
/// assert_eq!(decode(&frame).unwrap(), message);
/// ```
pub fn encode(message: &Message) -> ProtocolResult<Vec<u8>> {
    let json = serde_json::to_vec(message).map_err(ProtocolError::Serialization)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + json.len());
    frame.extend_from_slice(&(json.len() as u32).to_be_bytes());
    frame.extend_from_slice(&json);
    Ok(frame)
}

/// Decodes a complete frame.
///
/// The frame must contain exactly the announced payload: short frames and
/// frames with extra bytes are both rejected.
pub fn decode(frame: &[u8]) -> ProtocolResult<Message> {
    let len = payload_len(frame)?;

    let expected = HEADER_LEN + len;
    if frame.len() < expected {
        return Err(ProtocolError::IncompleteMessage {
            expected,
            received: frame.len(),
        });
    }
    if frame.len() > expected {
        return Err(ProtocolError::TrailingBytes {
            expected,
            received: frame.len(),
        });
    }

    serde_json::from_slice(&frame[HEADER_LEN..]).map_err(ProtocolError::Malformed)
}

fn payload_len(frame: &[u8]) -> ProtocolResult<usize> {
    let Some(header) = frame.first_chunk::<HEADER_LEN>() else {
        return Err(ProtocolError::IncompleteMessage {
            expected: HEADER_LEN,
            received: frame.len(),
        });
    };
    check_len(u32::from_be_bytes(*header) as usize)
}

fn check_len(len: usize) -> ProtocolResult<usize> {
    if len == 0 {
        return Err(ProtocolError::EmptyMessage);
    }
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(len)
}

/// Reads one complete frame (header included) from a byte stream.
///
/// Returns `Ok(None)` on a clean EOF before the first header byte.
pub async fn read_frame<R>(reader: &mut R) -> ProtocolResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = check_len(u32::from_be_bytes(header) as usize)?;

    let mut frame = vec![0u8; HEADER_LEN + len];
    frame[..HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut frame[HEADER_LEN..]).await?;
    Ok(Some(frame))
}

/// Writes one frame produced by [`encode`] and flushes.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
