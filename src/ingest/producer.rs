//! Clip producer: pulls segments from a source, spools them, and publishes
//! [`ClipEvent`]s. Also home of the spool retention janitor.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditBuffer, AuditKind};
use crate::bus::{Bus, BusMessage, Topic};
use crate::config::PipelineConfig;
use crate::gameday::GameDayController;
use crate::runtime::RuntimeState;
use crate::telemetry::Telemetry;
use crate::types::{new_id, ClipEvent, Milestone, TraceContext};

use super::source::{ClipFeed, ClipSource};

pub struct ClipProducer {
    cfg: Arc<PipelineConfig>,
    bus: Arc<Bus>,
    audit: Arc<AuditBuffer>,
    state: Arc<RuntimeState>,
    gameday: Arc<GameDayController>,
    telemetry: Arc<dyn Telemetry>,
}

impl ClipProducer {
    pub fn new(
        cfg: Arc<PipelineConfig>,
        bus: Arc<Bus>,
        audit: Arc<AuditBuffer>,
        state: Arc<RuntimeState>,
        gameday: Arc<GameDayController>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            cfg,
            bus,
            audit,
            state,
            gameday,
            telemetry,
        }
    }

    /// Pull from the source until it reports EOF, errors persistently, or the
    /// token is cancelled. One bad segment never stops ingestion.
    pub async fn run(&self, mut source: Box<dyn ClipSource>, cancel: CancellationToken) {
        info!(source = source.source_name(), "producer started");
        let mut clip_index: u64 = 0;
        loop {
            let feed = tokio::select! {
                () = cancel.cancelled() => break,
                f = source.next_clip() => f,
            };
            match feed {
                Ok(ClipFeed::Clip(clip)) => {
                    if let Err(e) = self.publish_clip(clip, clip_index).await {
                        warn!(clip_index, error = %e, "failed to spool clip");
                    }
                    clip_index += 1;
                }
                Ok(ClipFeed::Eof) => {
                    info!(clips = clip_index, "clip source exhausted");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "clip source error");
                    self.audit.add(
                        AuditKind::Health,
                        "producer",
                        self.gameday.tag_payload(json!({
                            "event": "ingest_error",
                            "error": e.to_string(),
                        })),
                    );
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
        info!("producer stopped");
    }

    /// Assign a trace, move the segment into the spool, and publish it.
    async fn publish_clip(
        &self,
        clip: super::source::LocalClip,
        clip_index: u64,
    ) -> anyhow::Result<()> {
        let trace_id = new_id();
        let spool_dir = &self.cfg.ingest.spool_dir;
        tokio::fs::create_dir_all(spool_dir).await?;
        let spooled = spool_dir.join(format!("{trace_id}_{clip_index:06}.mp4"));
        tokio::fs::rename(&clip.path, &spooled).await?;
        let bytes = tokio::fs::metadata(&spooled).await?.len();

        self.state.mark(&trace_id, Milestone::Clip);

        let event = ClipEvent {
            clip_id: new_id(),
            trace_id: trace_id.clone(),
            trace_ctx: TraceContext::default(),
            camera_id: self.cfg.ingest.camera_id.clone(),
            clip_index,
            clip_start_ts: clip.start_ts,
            clip_end_ts: clip.end_ts,
            clip_path: spooled,
        };
        self.audit.add(
            AuditKind::Clip,
            &trace_id,
            serde_json::to_value(&event).unwrap_or_else(|_| json!({})),
        );

        let tags = self.gameday.tags();
        self.telemetry.count("linesight.clips.produced", 1, &tags);
        self.telemetry
            .distribution("linesight.clip.bytes", bytes as f64, &tags);
        debug!(trace_id = %trace_id, clip_index, bytes, "clip spooled");

        self.bus.publish(Topic::Clips, BusMessage::Clip(event));
        Ok(())
    }
}

/// Delete spooled segments older than the retention TTL. Runs until
/// cancelled; a scan failure is logged and retried next interval.
pub async fn run_janitor(
    cfg: Arc<PipelineConfig>,
    telemetry: Arc<dyn Telemetry>,
    cancel: CancellationToken,
) {
    let interval = Duration::from_secs(cfg.ingest.janitor_interval_secs.max(1));
    let ttl = Duration::from_secs(cfg.ingest.clip_ttl_secs);
    let mut ticker = tokio::time::interval(interval);
    info!(
        ttl_s = cfg.ingest.clip_ttl_secs,
        interval_s = cfg.ingest.janitor_interval_secs,
        "janitor started"
    );
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match sweep_spool(&cfg.ingest.spool_dir, ttl).await {
                    Ok(0) => {}
                    Ok(deleted) => {
                        debug!(deleted, "janitor swept expired clips");
                        telemetry.count("linesight.janitor.deleted", deleted as i64, &Vec::new());
                    }
                    Err(e) => warn!(error = %e, "janitor sweep failed"),
                }
            }
        }
    }
    info!("janitor stopped");
}

async fn sweep_spool(dir: &std::path::Path, ttl: Duration) -> anyhow::Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut deleted = 0u64;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let expired = meta
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .is_some_and(|age| age > ttl);
        if expired && tokio::fs::remove_file(&path).await.is_ok() {
            deleted += 1;
        }
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweep_deletes_only_expired_mp4() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old = dir.path().join("old.mp4");
        let fresh = dir.path().join("fresh.mp4");
        let other = dir.path().join("notes.txt");
        for p in [&old, &fresh, &other] {
            std::fs::write(p, b"x").expect("write");
        }

        // Zero TTL expires everything with an mp4 extension immediately
        let deleted = sweep_spool(dir.path(), Duration::from_secs(0))
            .await
            .expect("sweep");
        assert_eq!(deleted, 2);
        assert!(!old.exists());
        assert!(other.exists());

        // A long TTL deletes nothing
        std::fs::write(&fresh, b"x").expect("write");
        let deleted = sweep_spool(dir.path(), Duration::from_secs(3600))
            .await
            .expect("sweep");
        assert_eq!(deleted, 0);
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn sweep_of_missing_dir_is_a_noop() {
        let deleted = sweep_spool(std::path::Path::new("/nonexistent/spool"), Duration::ZERO)
            .await
            .expect("sweep");
        assert_eq!(deleted, 0);
    }
}
