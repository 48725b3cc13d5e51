//! Per-session log batching.
//!
//! Container output is split on newlines and buffered per session. A
//! buffer flushes when it is 1 s old, holds 64 KiB, or holds 1024 lines,
//! whichever comes first. Each flush gzips the lines into one batch
//! message. The pump never blocks the container: when the publish channel
//! is saturated, lines are dropped and counted.

use std::io::Write;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use uuid::Uuid;

use manman_core::bus::messages::LogBatchMessage;
use manman_core::model::LogSource;
use manman_core::{Error, Result};

pub const MAX_BATCH_AGE_MS: i64 = 1_000;
pub const MAX_BATCH_BYTES: usize = 64 * 1024;
pub const MAX_BATCH_LINES: usize = 1024;

/// Accumulates lines for one session and cuts gzipped batches.
pub struct LogBatcher {
    session_id: i64,
    lines: Vec<(LogSource, String)>,
    bytes: usize,
    opened_at: Option<DateTime<Utc>>,
    last_at: Option<DateTime<Utc>>,
}

impl LogBatcher {
    pub fn new(session_id: i64) -> Self {
        Self {
            session_id,
            lines: Vec::new(),
            bytes: 0,
            opened_at: None,
            last_at: None,
        }
    }

    /// Add one line; returns a batch when a size threshold tripped.
    pub fn push(
        &mut self,
        source: LogSource,
        line: String,
        now: DateTime<Utc>,
    ) -> Result<Option<LogBatchMessage>> {
        self.bytes += line.len() + 1;
        self.lines.push((source, line));
        self.opened_at.get_or_insert(now);
        self.last_at = Some(now);
        if self.lines.len() >= MAX_BATCH_LINES || self.bytes >= MAX_BATCH_BYTES {
            return self.flush(now);
        }
        Ok(None)
    }

    /// Whether the age threshold has passed.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.opened_at
            .is_some_and(|opened| (now - opened).num_milliseconds() >= MAX_BATCH_AGE_MS)
    }

    /// Cut the current buffer into a batch, if any lines are pending.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Result<Option<LogBatchMessage>> {
        if self.lines.is_empty() {
            return Ok(None);
        }
        let lines = std::mem::take(&mut self.lines);
        self.bytes = 0;
        let start_ts = self.opened_at.take().unwrap_or(now);
        let end_ts = self.last_at.take().unwrap_or(now);

        let source = batch_source(&lines);
        let line_count = lines.len() as i64;
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for (_, line) in &lines {
            encoder
                .write_all(line.as_bytes())
                .and_then(|()| encoder.write_all(b"\n"))
                .map_err(|e| Error::internal(format!("gzip encode: {e}")))?;
        }
        let compressed_logs = encoder
            .finish()
            .map_err(|e| Error::internal(format!("gzip finish: {e}")))?;

        Ok(Some(LogBatchMessage {
            session_id: self.session_id,
            batch_id: Uuid::new_v4(),
            start_ts,
            end_ts,
            line_count,
            source,
            compressed_logs,
        }))
    }
}

fn batch_source(lines: &[(LogSource, String)]) -> LogSource {
    let mut iter = lines.iter().map(|(source, _)| *source);
    let Some(first) = iter.next() else {
        return LogSource::Mixed;
    };
    if iter.all(|source| source == first) {
        first
    } else {
        LogSource::Mixed
    }
}

/// Splits a raw byte stream into lines, holding the trailing partial.
#[derive(Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk; returns the completed lines.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for byte in chunk {
            if *byte == b'\n' {
                let raw = std::mem::take(&mut self.partial);
                lines.push(decode_line(&raw));
            } else {
                self.partial.push(*byte);
            }
        }
        lines
    }

    /// Drain the trailing partial line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            let raw = std::mem::take(&mut self.partial);
            Some(decode_line(&raw))
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    text.strip_suffix('\r').unwrap_or(&text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn line_threshold_cuts_a_batch() {
        let mut batcher = LogBatcher::new(7);
        let mut cut = None;
        for i in 0..MAX_BATCH_LINES {
            cut = batcher
                .push(LogSource::Stdout, format!("line {i}"), at(i as i64))
                .unwrap();
        }
        let batch = cut.expect("line threshold should flush");
        assert_eq!(batch.line_count, MAX_BATCH_LINES as i64);
        assert_eq!(batch.source, LogSource::Stdout);
        assert_eq!(batch.start_ts, at(0));
    }

    #[test]
    fn byte_threshold_cuts_a_batch() {
        let mut batcher = LogBatcher::new(7);
        let big = "x".repeat(40 * 1024);
        assert!(batcher.push(LogSource::Stdout, big.clone(), at(0)).unwrap().is_none());
        let batch = batcher.push(LogSource::Stdout, big, at(1)).unwrap();
        assert!(batch.is_some());
    }

    #[test]
    fn age_threshold_is_observable() {
        let mut batcher = LogBatcher::new(7);
        batcher.push(LogSource::Stderr, "warn".into(), at(0)).unwrap();
        assert!(!batcher.is_stale(at(500)));
        assert!(batcher.is_stale(at(1000)));
        let batch = batcher.flush(at(1000)).unwrap().expect("pending lines");
        assert_eq!(batch.source, LogSource::Stderr);
        assert_eq!(batch.line_count, 1);
    }

    #[test]
    fn mixed_sources_are_marked_mixed() {
        let mut batcher = LogBatcher::new(7);
        batcher.push(LogSource::Stdout, "out".into(), at(0)).unwrap();
        batcher.push(LogSource::Stderr, "err".into(), at(1)).unwrap();
        let batch = batcher.flush(at(2)).unwrap().expect("pending lines");
        assert_eq!(batch.source, LogSource::Mixed);
    }

    #[test]
    fn flushed_content_decompresses_to_lines() {
        use std::io::Read;
        let mut batcher = LogBatcher::new(7);
        batcher.push(LogSource::Stdout, "a".into(), at(0)).unwrap();
        batcher.push(LogSource::Stdout, "b".into(), at(1)).unwrap();
        let batch = batcher.flush(at(2)).unwrap().expect("pending lines");
        let mut decoder = flate2::read::GzDecoder::new(batch.compressed_logs.as_slice());
        let mut text = String::new();
        decoder.read_to_string(&mut text).unwrap();
        assert_eq!(text, "a\nb\n");
    }

    #[test]
    fn empty_flush_is_none() {
        let mut batcher = LogBatcher::new(7);
        assert!(batcher.flush(at(0)).unwrap().is_none());
    }

    #[test]
    fn splitter_handles_partials_and_crlf() {
        let mut splitter = LineSplitter::default();
        assert_eq!(splitter.feed(b"hello wo"), Vec::<String>::new());
        assert_eq!(splitter.feed(b"rld\r\nnext"), vec!["hello world".to_string()]);
        assert_eq!(splitter.finish(), Some("next".to_string()));
        assert_eq!(splitter.finish(), None);
    }
}
