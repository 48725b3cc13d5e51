//! Log archival and historical queries.
//!
//! Inbound batches arrive gzipped (broker or the `SendBatchedLogs` RPC);
//! the decompressed content is uploaded to the object store under the
//! deterministic key and a `LogReference` row records the window.

use std::io::Read;

use chrono::{DateTime, Duration, DurationRound, Utc};
use flate2::read::GzDecoder;
use manman_core::bus::messages::LogBatchMessage;
use manman_core::model::log_object_key;
use manman_core::{Error, Result};

use crate::state::AppState;

/// Maximum window `GetHistoricalLogs` accepts.
pub const MAX_WINDOW_SECS: i64 = 30 * 60;

pub fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::validation(format!("bad gzip payload: {e}")))?;
    Ok(out)
}

/// Archive one batch: decompress, upload, insert the reference row.
pub async fn archive_batch(state: &AppState, batch: &LogBatchMessage) -> Result<()> {
    // Unknown sessions are permanent: the batch can never be attributed.
    state.catalog.get_session(batch.session_id).await.map_err(|e| {
        if e.kind == manman_core::ErrorKind::NotFound {
            Error::permanent(format!("log batch for unknown session {}", batch.session_id))
        } else {
            e
        }
    })?;

    let content = decompress(&batch.compressed_logs)?;
    let key = log_object_key(batch.session_id, batch.start_ts, batch.batch_id);
    let url = state
        .objects
        .put(
            &key,
            content,
            &[
                ("session-id", batch.session_id.to_string()),
                ("source", batch.source.as_str().to_string()),
                ("line-count", batch.line_count.to_string()),
            ],
        )
        .await?;
    state
        .catalog
        .insert_log_reference(
            batch.session_id,
            &url,
            batch.start_ts,
            batch.end_ts,
            batch.line_count,
            batch.source,
        )
        .await?;
    Ok(())
}

/// Ingest a set of batches, collecting per-batch failures.
pub async fn ingest_batches(
    state: &AppState,
    batches: Vec<LogBatchMessage>,
) -> (u32, u32, Vec<String>) {
    let mut accepted = 0;
    let mut failed = 0;
    let mut errors = Vec::new();
    for batch in &batches {
        match archive_batch(state, batch).await {
            Ok(()) => accepted += 1,
            Err(e) => {
                failed += 1;
                errors.push(format!("batch {}: {e}", batch.batch_id));
            }
        }
    }
    (accepted, failed, errors)
}

/// One minute bucket of decompressed log content.
pub struct HistoricalBucket {
    pub bucket: DateTime<Utc>,
    pub content: String,
    pub line_count: i64,
}

/// Fetch archived logs intersecting `[start, end]`, grouped into minute
/// buckets, plus the session's known bounds. Windows longer than 30
/// minutes are rejected.
pub async fn historical_logs(
    state: &AppState,
    session_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(Vec<HistoricalBucket>, Option<(DateTime<Utc>, DateTime<Utc>)>)> {
    if end < start {
        return Err(Error::validation("end_time precedes start_time"));
    }
    if (end - start).num_seconds() > MAX_WINDOW_SECS {
        return Err(Error::validation(format!(
            "window exceeds {MAX_WINDOW_SECS} seconds; narrow the query"
        )));
    }

    let references = state
        .catalog
        .log_references_in_window(session_id, start, end)
        .await?;
    let bounds = state.catalog.log_bounds(session_id).await?;

    let mut buckets: Vec<HistoricalBucket> = Vec::new();
    for reference in references {
        let bytes = state.objects.get(&reference.file_path).await?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let bucket = reference
            .start_time
            .duration_trunc(Duration::minutes(1))
            .map_err(|e| Error::internal(format!("bucket truncation: {e}")))?;

        match buckets.last_mut() {
            Some(last) if last.bucket == bucket => {
                if !last.content.is_empty() && !last.content.ends_with('\n') {
                    last.content.push('\n');
                }
                last.content.push_str(&content);
                last.line_count += reference.line_count;
            }
            _ => buckets.push(HistoricalBucket {
                bucket,
                content,
                line_count: reference.line_count,
            }),
        }
    }
    Ok((buckets, bounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn gzip_round_trip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"line one\nline two\n").unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decompress(&compressed).unwrap(), b"line one\nline two\n");
    }

    #[test]
    fn garbage_gzip_is_a_validation_error() {
        let err = decompress(b"definitely not gzip").unwrap_err();
        assert_eq!(err.kind, manman_core::ErrorKind::Validation);
    }
}
