mod pull;
mod push;

pub use pull::PullTransport;
pub use push::PushTransport;

use crate::domain::LogEntry;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use thiserror::Error;
use uuid::Uuid;

/// Frames larger than this are rejected on receive rather than allocated.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge(usize),
}

/// Wire message between a Worker (push) and a Collector (pull): either one
/// entry or an ordered batch. Batches carry an id for correlation logging
/// on both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Entry { entry: LogEntry },
    Batch { id: Uuid, entries: Vec<LogEntry> },
}

impl Frame {
    pub fn entry(entry: LogEntry) -> Self {
        Frame::Entry { entry }
    }

    pub fn batch(entries: Vec<LogEntry>) -> Self {
        Frame::Batch {
            id: Uuid::new_v4(),
            entries,
        }
    }
}

/// Write one length-prefixed JSON frame.
pub(crate) fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<(), TransportError> {
    let payload = serde_json::to_vec(frame)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
pub(crate) fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, TransportError> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}
