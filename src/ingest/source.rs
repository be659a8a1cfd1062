//! Clip acquisition seam.
//!
//! A [`ClipSource`] yields finished video segments one at a time; the
//! producer owns spooling, trace assignment, and publication. The synthetic
//! source exists so the whole pipeline can run (and be tested) without a
//! camera: it writes placeholder segment files of plausible size.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;

/// A finished segment handed to the producer. The file at `path` is owned by
/// the producer from this point on (it will be moved into the spool).
#[derive(Debug, Clone)]
pub struct LocalClip {
    pub path: PathBuf,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
}

/// One pull from a clip source.
#[derive(Debug)]
pub enum ClipFeed {
    Clip(LocalClip),
    /// The source is exhausted; the producer shuts down cleanly.
    Eof,
}

/// Source of finished video segments.
#[async_trait]
pub trait ClipSource: Send {
    /// Produce the next segment, waiting as long as the capture takes.
    async fn next_clip(&mut self) -> Result<ClipFeed>;

    fn source_name(&self) -> &str;
}

/// Camera stand-in that fabricates segment files on a fixed cadence.
pub struct SyntheticClipSource {
    staging_dir: PathBuf,
    clip_seconds: f64,
    interval: Duration,
    min_bytes: u64,
    /// Stop after this many clips; `None` runs until cancelled.
    limit: Option<u64>,
    produced: u64,
}

impl SyntheticClipSource {
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        clip_seconds: f64,
        interval: Duration,
        min_bytes: u64,
        limit: Option<u64>,
    ) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            clip_seconds,
            interval,
            min_bytes,
            limit,
            produced: 0,
        }
    }
}

#[async_trait]
impl ClipSource for SyntheticClipSource {
    async fn next_clip(&mut self) -> Result<ClipFeed> {
        if let Some(limit) = self.limit {
            if self.produced >= limit {
                return Ok(ClipFeed::Eof);
            }
        }
        tokio::time::sleep(self.interval).await;

        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .with_context(|| format!("creating staging dir {}", self.staging_dir.display()))?;
        let path = self.staging_dir.join(format!("segment_{:06}.mp4", self.produced));

        // Size jitter keeps the spool realistic; content is irrelevant.
        let jitter = rand::thread_rng().gen_range(0..2048u64);
        let body = vec![0u8; (self.min_bytes * 2 + jitter) as usize];
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("writing segment {}", path.display()))?;

        self.produced += 1;
        let end_ts = Utc::now();
        let start_ts = end_ts
            - ChronoDuration::milliseconds((self.clip_seconds * 1000.0) as i64);
        Ok(ClipFeed::Clip(LocalClip {
            path,
            start_ts,
            end_ts,
        }))
    }

    fn source_name(&self) -> &str {
        "synthetic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_source_honors_limit_and_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut src = SyntheticClipSource::new(
            dir.path(),
            2.0,
            Duration::from_millis(0),
            1024,
            Some(2),
        );

        for _ in 0..2 {
            match src.next_clip().await.expect("clip") {
                ClipFeed::Clip(clip) => {
                    let len = std::fs::metadata(&clip.path).expect("metadata").len();
                    assert!(len >= 2048);
                    assert!(clip.start_ts < clip.end_ts);
                }
                ClipFeed::Eof => panic!("eof before limit"),
            }
        }
        assert!(matches!(
            src.next_clip().await.expect("eof"),
            ClipFeed::Eof
        ));
    }
}
