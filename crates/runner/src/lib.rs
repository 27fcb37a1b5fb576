//! Driver State Engine Runner
//!
//! Replays recorded frame inputs (one JSON object per line) through the
//! driver monitor and writes one JSON result line per frame.

use anyhow::Context;
use dms::{DmsError, DriverMonitor, FrameInput, MonitorMode};
use driver_auth::ProfileStore;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize logging; `RUST_LOG` overrides the default `info` filter
pub fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    // A subscriber may already be installed (tests, embedding applications)
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Serve Prometheus metrics on `addr`
///
/// Must be called from within a tokio runtime.
pub fn install_metrics_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to start metrics exporter on {}", addr))?;
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Counters for one replay run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub frames: u64,
    /// Lines that did not parse as a frame
    pub skipped: u64,
    pub events: u64,
    pub detecting_frames: u64,
    /// Ended early on the stop signal
    pub stopped: bool,
}

/// Feed every frame in `input` to `monitor`, writing results to `output`
pub fn replay<S, R, W>(
    monitor: &mut DriverMonitor<S>,
    input: R,
    mut output: W,
) -> anyhow::Result<ReplaySummary>
where
    S: ProfileStore + 'static,
    R: BufRead,
    W: Write,
{
    let mut summary = ReplaySummary::default();

    for (line_no, line) in input.lines().enumerate() {
        let line = line.context("failed to read frame input")?;
        if line.trim().is_empty() {
            continue;
        }

        let frame: FrameInput = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping malformed frame");
                counter!("dms_frames_skipped_total").increment(1);
                summary.skipped += 1;
                continue;
            }
        };

        let result = match monitor.process(&frame) {
            Ok(result) => result,
            Err(DmsError::Stopped) => {
                info!(frame_id = frame.frame_id, "Stop requested, ending replay");
                summary.stopped = true;
                break;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("frame {} failed", frame.frame_id));
            }
        };

        summary.frames += 1;
        if result.mode == MonitorMode::Detecting {
            summary.detecting_frames += 1;
        }
        if let Some(event) = &result.status.event {
            summary.events += 1;
            debug!(frame_id = result.frame_id, event_type = %event.event_type, "Event");
        }

        serde_json::to_writer(&mut output, &result).context("failed to encode result")?;
        output.write_all(b"\n").context("failed to write result")?;
    }

    output.flush().context("failed to flush output")?;
    info!(
        frames = summary.frames,
        skipped = summary.skipped,
        events = summary.events,
        "Replay finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dms::{DmsConfig, FaceLandmarks};
    use driver_auth::{FaceEmbedding, UserProfile};
    use signal_filter::{HeadPose, Point2};
    use std::io::Cursor;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use storage::Repository;

    fn config() -> DmsConfig {
        let mut config = DmsConfig::default();
        config.identity.embedding_dim = 4;
        config.identity.min_consistent_frames = 2;
        config
    }

    fn store() -> Arc<Repository> {
        Arc::new(Repository::with_profiles(vec![UserProfile::new(
            7,
            0.2,
            FaceEmbedding::from_raw(vec![1.0, 0.0, 0.0, 0.0]),
        )]))
    }

    fn eye(cx: f64) -> [Point2; 6] {
        [
            Point2::new(cx - 0.03, 0.4),
            Point2::new(cx - 0.01, 0.391),
            Point2::new(cx + 0.01, 0.391),
            Point2::new(cx + 0.03, 0.4),
            Point2::new(cx + 0.01, 0.409),
            Point2::new(cx - 0.01, 0.409),
        ]
    }

    fn frame_line(id: u64) -> String {
        let frame = FrameInput {
            frame_id: id,
            timestamp_ms: id * 33,
            face: Some(FaceLandmarks {
                left_eye: eye(0.4),
                right_eye: eye(0.6),
                mouth: eye(0.5),
            }),
            pose: Some(HeadPose::new(2.0, 3.0, 1.0)),
            hands: None,
            embedding: Some(vec![1.0, 0.0, 0.0, 0.0]),
        };
        serde_json::to_string(&frame).unwrap()
    }

    #[test]
    fn test_replay_writes_one_line_per_frame() {
        let mut monitor = DriverMonitor::new(config(), store()).unwrap();
        let input = [frame_line(0), "{not json".to_string(), frame_line(1), frame_line(2)].join("\n");
        let mut output = Vec::new();

        let summary = replay(&mut monitor, Cursor::new(input), &mut output).unwrap();
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.stopped);
        assert!(summary.detecting_frames >= 1);

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["mode"], "detecting");
        assert_eq!(last["user_id"], 7);
    }

    #[test]
    fn test_replay_stops_on_signal() {
        let mut monitor = DriverMonitor::new(config(), store()).unwrap();
        monitor.stop_handle().store(true, Ordering::Relaxed);
        let mut output = Vec::new();

        let summary = replay(&mut monitor, Cursor::new(frame_line(0)), &mut output).unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.frames, 0);
        assert!(output.is_empty());
    }
}
