//! JSON-lines replay of recorded input streams.
//!
//! Each non-blank line of the log is one record:
//!
//! ```json
//! {"at_ms": 120, "stream": "detected_objects", "payload": { ... }}
//! ```
//!
//! `stream` is matched against the configured [`StreamNames`]; `payload` is
//! decoded into the message type of that stream.  Lines starting with `#`
//! are comments.
//!
//! [`replay`] groups records per stream and delivers each group from its own
//! thread, sleeping until each record's offset.  Deliveries on different
//! streams therefore interleave the way live callbacks would.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

use sceneparse_perception::TfBuffer;
use sceneparse_runtime::{IngestReport, SceneAssessor};
use sceneparse_types::{DetectedObjectList, HypothesisList, PointCloud, Transform3D};

use crate::config::StreamNames;

/// Raw log line.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    at_ms: u64,
    stream: String,
    payload: serde_json::Value,
}

/// Payload of a `transform` record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransformUpdate {
    pub parent: String,
    pub child: String,
    pub transform: Transform3D,
}

/// A decoded input message.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Transform(TransformUpdate),
    Background(PointCloud),
    SceneCloud(PointCloud),
    DetectedObjects(DetectedObjectList),
    Hypotheses(HypothesisList),
}

impl Delivery {
    fn lane(&self) -> usize {
        match self {
            Delivery::Transform(_) => 0,
            Delivery::Background(_) => 1,
            Delivery::SceneCloud(_) => 2,
            Delivery::DetectedObjects(_) => 3,
            Delivery::Hypotheses(_) => 4,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Delivery::Transform(_) => "transform",
            Delivery::Background(_) => "background_cloud",
            Delivery::SceneCloud(_) => "scene_cloud",
            Delivery::DetectedObjects(_) => "detected_objects",
            Delivery::Hypotheses(_) => "hypotheses",
        }
    }
}

const LANES: usize = 5;

/// A delivery scheduled at an offset from replay start.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedDelivery {
    pub at: Duration,
    pub delivery: Delivery,
}

/// Parse a replay log.  Errors carry the 1-based line number.
pub fn parse_log<R: BufRead>(reader: R, streams: &StreamNames) -> Result<Vec<TimedDelivery>, String> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.map_err(|e| format!("Failed to read line {}: {}", lineno, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let raw: RawRecord = serde_json::from_str(trimmed)
            .map_err(|e| format!("Invalid record on line {}: {}", lineno, e))?;
        let delivery = decode(&raw, streams)
            .map_err(|e| format!("Invalid {} payload on line {}: {}", raw.stream, lineno, e))?;
        out.push(TimedDelivery {
            at: Duration::from_millis(raw.at_ms),
            delivery,
        });
    }
    Ok(out)
}

fn decode(raw: &RawRecord, streams: &StreamNames) -> Result<Delivery, String> {
    let payload = raw.payload.clone();
    let s = raw.stream.as_str();
    let delivery = if s == streams.transform {
        Delivery::Transform(serde_json::from_value(payload).map_err(|e| e.to_string())?)
    } else if s == streams.background_cloud {
        Delivery::Background(serde_json::from_value(payload).map_err(|e| e.to_string())?)
    } else if s == streams.scene_cloud {
        Delivery::SceneCloud(serde_json::from_value(payload).map_err(|e| e.to_string())?)
    } else if s == streams.detected_objects {
        Delivery::DetectedObjects(serde_json::from_value(payload).map_err(|e| e.to_string())?)
    } else if s == streams.hypotheses {
        Delivery::Hypotheses(serde_json::from_value(payload).map_err(|e| e.to_string())?)
    } else {
        return Err(format!("unknown stream {s:?}"));
    };
    Ok(delivery)
}

/// Counters gathered over one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub delivered: usize,
    pub rejected: usize,
    pub detection_passes: usize,
    pub hypothesis_passes: usize,
}

impl ReplayStats {
    fn merge(&mut self, other: ReplayStats) {
        self.delivered += other.delivered;
        self.rejected += other.rejected;
        self.detection_passes += other.detection_passes;
        self.hypothesis_passes += other.hypothesis_passes;
    }

    fn count(&mut self, report: IngestReport) {
        self.detection_passes += usize::from(report.detection.is_completed());
        self.hypothesis_passes += usize::from(report.hypothesis.is_completed());
    }
}

/// Deliver `records` to `assessor` and `transforms`, one thread per stream.
///
/// Returns once every stream is exhausted or `shutdown` is raised.
pub fn replay(
    records: Vec<TimedDelivery>,
    assessor: Arc<SceneAssessor>,
    transforms: Arc<TfBuffer>,
    shutdown: Arc<AtomicBool>,
) -> ReplayStats {
    let mut lanes: Vec<Vec<TimedDelivery>> = vec![Vec::new(); LANES];
    for record in records {
        lanes[record.delivery.lane()].push(record);
    }

    let start = Instant::now();
    let handles: Vec<_> = lanes
        .into_iter()
        .filter(|lane| !lane.is_empty())
        .map(|mut lane| {
            lane.sort_by_key(|r| r.at);
            let assessor = assessor.clone();
            let transforms = transforms.clone();
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                let mut stats = ReplayStats::default();
                for record in lane {
                    if !sleep_until(start + record.at, &shutdown) {
                        break;
                    }
                    deliver(record.delivery, &assessor, &transforms, &mut stats);
                }
                stats
            })
        })
        .collect();

    let mut total = ReplayStats::default();
    for handle in handles {
        match handle.join() {
            Ok(stats) => total.merge(stats),
            Err(_) => warn!("replay delivery thread panicked"),
        }
    }
    total
}

fn deliver(
    delivery: Delivery,
    assessor: &SceneAssessor,
    transforms: &TfBuffer,
    stats: &mut ReplayStats,
) {
    let label = delivery.label();
    debug!(stream = label, "delivering");
    stats.delivered += 1;
    match delivery {
        Delivery::Transform(t) => transforms.set_transform(&t.parent, &t.child, t.transform),
        Delivery::Background(cloud) => {
            if let Err(e) = assessor.on_background_cloud(&cloud) {
                warn!(stream = label, error = %e, "record rejected");
                stats.rejected += 1;
            }
        }
        Delivery::SceneCloud(cloud) => match assessor.on_scene_cloud(&cloud) {
            Ok(report) => stats.count(report),
            Err(e) => {
                warn!(stream = label, error = %e, "record rejected");
                stats.rejected += 1;
            }
        },
        Delivery::DetectedObjects(list) => stats.count(assessor.on_detected_objects(list)),
        Delivery::Hypotheses(list) => stats.count(assessor.on_hypotheses(list)),
    }
}

/// Sleep until `deadline` in short slices.  Returns `false` on shutdown.
fn sleep_until(deadline: Instant, shutdown: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(20);
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SLICE));
    }
}
