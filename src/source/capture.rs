//! Capture file format for recorded telemetry.
//!
//! ```text
//! magic   8 bytes  "SRCAPv1\0"
//! record  u32 LE   milliseconds since the first datagram
//!         u16 LE   datagram length
//!         [u8]     datagram bytes
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Result, SrError};
use crate::packet::MAX_PACKET_BYTES;

pub const CAPTURE_MAGIC: &[u8; 8] = b"SRCAPv1\0";
const RECORD_HEADER: usize = 6;

/// One recorded datagram with its offset from the start of the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedDatagram {
    pub offset: Duration,
    pub bytes: Vec<u8>,
}

/// Appends datagrams to a capture file.
pub struct CaptureWriter {
    path: PathBuf,
    out: BufWriter<File>,
    started: Option<Instant>,
    records: u64,
}

impl CaptureWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| SrError::file_error(path.clone(), e))?;
        let mut out = BufWriter::new(file);
        out.write_all(CAPTURE_MAGIC).map_err(|e| SrError::file_error(path.clone(), e))?;
        info!(path = %path.display(), "recording telemetry");
        Ok(Self { path, out, started: None, records: 0 })
    }

    pub fn record(&mut self, bytes: &[u8], at: Instant) -> Result<()> {
        let len = u16::try_from(bytes.len())
            .ok()
            .filter(|len| usize::from(*len) <= MAX_PACKET_BYTES)
            .ok_or_else(|| SrError::Source {
                reason: format!("datagram of {} bytes is too large to record", bytes.len()),
                source: None,
            })?;
        let started = *self.started.get_or_insert(at);
        let offset_ms = u32::try_from(at.saturating_duration_since(started).as_millis())
            .unwrap_or(u32::MAX);

        let mut header = [0u8; RECORD_HEADER];
        header[0..4].copy_from_slice(&offset_ms.to_le_bytes());
        header[4..6].copy_from_slice(&len.to_le_bytes());
        self.out
            .write_all(&header)
            .and_then(|()| self.out.write_all(bytes))
            .map_err(|e| SrError::file_error(self.path.clone(), e))?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out.flush().map_err(|e| SrError::file_error(self.path.clone(), e))
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        if let Err(e) = self.out.flush() {
            debug!(error = %e, "capture flush on drop failed");
        }
    }
}

/// Parse a whole capture from memory. A trailing partial record is ignored.
pub fn parse_capture(data: &[u8]) -> Result<Vec<CapturedDatagram>> {
    let body = data.strip_prefix(CAPTURE_MAGIC.as_slice()).ok_or_else(|| SrError::Source {
        reason: "not a telemetry capture (bad magic)".to_string(),
        source: None,
    })?;

    let mut out = Vec::new();
    let mut pos = 0;
    while pos + RECORD_HEADER <= body.len() {
        let offset_ms =
            u32::from_le_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]]);
        let len = usize::from(u16::from_le_bytes([body[pos + 4], body[pos + 5]]));
        let start = pos + RECORD_HEADER;
        let Some(bytes) = body.get(start..start + len) else {
            debug!(offset = pos, "ignoring truncated capture record");
            break;
        };
        out.push(CapturedDatagram {
            offset: Duration::from_millis(u64::from(offset_ms)),
            bytes: bytes.to_vec(),
        });
        pos = start + len;
    }
    Ok(out)
}

pub fn read_capture(path: impl AsRef<Path>) -> Result<Vec<CapturedDatagram>> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| SrError::file_error(path.to_path_buf(), e))?;
    parse_capture(&data)
}
