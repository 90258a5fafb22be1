//! Streaming a pack body into its temp file.
//!
//! The engine issues at most one request per call. A resume sends
//! `Range: bytes=<offset>-` only when the temp file really holds that many
//! bytes; otherwise the transfer restarts from zero. A `206` continues the
//! temp file at the offset, a `200` rewrites it from the beginning.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::http::{HttpTransport, TransportError};
use crate::error::{PackError, PackResult};
use crate::session::Session;

/// HTTP 200 OK.
const STATUS_OK: u16 = 200;

/// HTTP 206 Partial Content.
const STATUS_PARTIAL: u16 = 206;

/// What to fetch and where to put it.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Source URL.
    pub url: &'a str,
    /// Temp file receiving the body.
    pub temp_path: &'a Path,
    /// Offset to resume from, 0 for a fresh transfer.
    pub resume_from: u64,
    /// Declared size of the complete body, 0 when unknown.
    pub total_bytes: u64,
}

/// How a transfer ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The whole body was written; `bytes` is the temp file length.
    Completed { bytes: u64 },
    /// The session went stale; `bytes` were on disk when it stopped.
    Interrupted { bytes: u64 },
}

/// Writes response bodies to disk in fixed-size chunks.
pub struct TransferEngine {
    transport: Arc<dyn HttpTransport>,
    chunk_size: usize,
    progress_step: u64,
}

impl TransferEngine {
    /// Create an engine.
    pub fn new(transport: Arc<dyn HttpTransport>, chunk_size: usize, progress_step: u64) -> Self {
        Self {
            transport,
            chunk_size: chunk_size.max(1),
            progress_step,
        }
    }

    /// Run one transfer for `session`.
    ///
    /// `is_live` is consulted after every chunk; the moment it returns
    /// `false` the engine stops writing and reports
    /// [`TransferOutcome::Interrupted`]. `on_progress` receives the byte count
    /// on disk whenever it has grown by at least the progress step, once at
    /// the start and once at the end.
    ///
    /// # Arguments
    ///
    /// * `request` - Source URL, temp file, resume offset and declared size
    /// * `session` - Session whose token aborts a pending read
    /// * `is_live` - Liveness check run after every written chunk
    /// * `on_progress` - Receives the number of bytes on disk
    ///
    /// # Returns
    ///
    /// [`TransferOutcome::Completed`] with the temp file length once the body
    /// has been fully written, or [`TransferOutcome::Interrupted`] if the
    /// session went stale first.
    ///
    /// # Errors
    ///
    /// * [`PackError::HttpError`] for any status other than 200 or 206
    /// * [`PackError::Unknown`] for transport failures and for a body that
    ///   ends before its `Content-Length` or the declared size
    /// * I/O errors writing the temp file
    pub async fn run<L, P>(
        &self,
        request: TransferRequest<'_>,
        session: &Session,
        is_live: L,
        mut on_progress: P,
    ) -> PackResult<TransferOutcome>
    where
        L: Fn() -> bool,
        P: FnMut(u64),
    {
        let pack_id = session.pack_id();
        let token = session.token();

        let offset = effective_offset(request.temp_path, request.resume_from);
        if offset < request.resume_from {
            warn!(
                pack_id,
                expected = request.resume_from,
                on_disk = offset,
                "Partial download shorter than recorded progress, restarting from zero"
            );
        }

        if !is_live() {
            return Ok(TransferOutcome::Interrupted { bytes: offset });
        }

        let range_start = (offset > 0).then_some(offset);
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Ok(TransferOutcome::Interrupted { bytes: offset });
            }
            response = self.transport.get(request.url, range_start) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(_) if !is_live() => return Ok(TransferOutcome::Interrupted { bytes: offset }),
            Err(e) => return Err(transport_error(e)),
        };

        let start = match response.status {
            STATUS_PARTIAL if offset > 0 => offset,
            STATUS_PARTIAL | STATUS_OK => {
                if offset > 0 {
                    info!(pack_id, offset, "Server ignored range request, restarting from zero");
                }
                0
            }
            status => {
                warn!(pack_id, status, url = request.url, "Unexpected HTTP status");
                return Err(PackError::HttpError(status));
            }
        };

        let mut file = open_temp(request.temp_path, start)?;
        let expected_end = response
            .content_length
            .map(|len| start.saturating_add(len))
            .unwrap_or(0)
            .max(request.total_bytes);
        debug!(pack_id, session = %session.id(), start, expected_end, "Transfer started");

        let mut written = start;
        let mut reported = start;
        on_progress(written);

        let mut body = response.body;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    flush(&mut file, request.temp_path)?;
                    return Ok(TransferOutcome::Interrupted { bytes: written });
                }
                next = body.next() => next,
            };

            let bytes = match next {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    flush(&mut file, request.temp_path)?;
                    if !is_live() {
                        return Ok(TransferOutcome::Interrupted { bytes: written });
                    }
                    return Err(transport_error(e));
                }
                None => break,
            };

            for chunk in bytes.chunks(self.chunk_size) {
                file.write_all(chunk)
                    .map_err(|e| PackError::io("write", request.temp_path, e))?;
                written += chunk.len() as u64;

                if !is_live() {
                    flush(&mut file, request.temp_path)?;
                    return Ok(TransferOutcome::Interrupted { bytes: written });
                }

                if written - reported >= self.progress_step {
                    on_progress(written);
                    reported = written;
                }
            }
        }

        flush(&mut file, request.temp_path)?;
        file.sync_all()
            .map_err(|e| PackError::io("sync", request.temp_path, e))?;

        if written < expected_end {
            if !is_live() {
                return Ok(TransferOutcome::Interrupted { bytes: written });
            }
            return Err(PackError::Unknown(format!(
                "connection closed after {} of {} bytes",
                written, expected_end
            )));
        }

        on_progress(written);
        debug!(pack_id, session = %session.id(), bytes = written, "Transfer complete");
        Ok(TransferOutcome::Completed { bytes: written })
    }
}

/// Offset a resume may actually use: `resume_from` when the temp file holds at
/// least that many bytes, otherwise 0.
fn effective_offset(temp_path: &Path, resume_from: u64) -> u64 {
    if resume_from == 0 {
        return 0;
    }
    let on_disk = fs::metadata(temp_path).map(|m| m.len()).unwrap_or(0);
    if on_disk >= resume_from {
        resume_from
    } else {
        0
    }
}

/// Open the temp file positioned at `start`, dropping anything past it.
fn open_temp(path: &Path, start: u64) -> PackResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PackError::io("create", parent, e))?;
    }

    if start == 0 {
        return File::create(path).map_err(|e| PackError::io("create", path, e));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| PackError::io("open", path, e))?;
    file.set_len(start)
        .map_err(|e| PackError::io("truncate", path, e))?;
    file.seek(SeekFrom::Start(start))
        .map_err(|e| PackError::io("seek", path, e))?;
    Ok(file)
}

fn flush(file: &mut File, path: &Path) -> PackResult<()> {
    file.flush().map_err(|e| PackError::io("flush", path, e))
}

fn transport_error(error: TransportError) -> PackError {
    PackError::Unknown(error.to_string())
}
