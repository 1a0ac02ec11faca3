//! `sceneparse` – command line front end for the scene parser.
//!
//! ```text
//! sceneparse replay <log.jsonl> [--config <path>]
//! sceneparse schema [structure|object_list|hypotheses|point_cloud|poses]
//! sceneparse init [<path>]
//! ```
//!
//! `replay` loads `sceneparse.toml`, wires the assessor to an in-process
//! event bus, feeds it a recorded JSON-lines log over one delivery thread per
//! stream and prints every output as it is published.  Ctrl-C stops the
//! replay early.  `schema` prints the JSON schema of a wire message and
//! `init` writes a default configuration file.

mod config;
mod replay;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use sceneparse_middleware::{BusSink, EventBus, Topic, TopicReceiver};
use sceneparse_perception::TfBuffer;
use sceneparse_runtime::{CompletionWatchdog, GeometricPhysics, SceneAssessor, telemetry};
use sceneparse_types::{
    DetectedObjectList, Event, EventPayload, HypothesisList, PassKind, PointCloud, PoseBroadcast,
    SceneGraphMsg,
};

/// Wire message whose schema `sceneparse schema` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaTarget {
    Structure,
    ObjectList,
    Hypotheses,
    PointCloud,
    Poses,
}

impl SchemaTarget {
    fn parse(name: &str) -> Result<Self, String> {
        match name {
            "structure" => Ok(Self::Structure),
            "object_list" => Ok(Self::ObjectList),
            "hypotheses" => Ok(Self::Hypotheses),
            "point_cloud" => Ok(Self::PointCloud),
            "poses" => Ok(Self::Poses),
            other => Err(format!("unknown message '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Replay {
        log: PathBuf,
        config: Option<PathBuf>,
    },
    Schema(SchemaTarget),
    Init(PathBuf),
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some((cmd, rest)) = args.split_first() else {
        return Err("missing command".to_string());
    };
    match cmd.as_str() {
        "help" | "-h" | "--help" => Ok(Command::Help),
        "schema" => match rest {
            [] => Ok(Command::Schema(SchemaTarget::Structure)),
            [name] => SchemaTarget::parse(name).map(Command::Schema),
            _ => Err("schema takes at most one message name".to_string()),
        },
        "init" => match rest {
            [] => Ok(Command::Init(config::config_path(None))),
            [path] => Ok(Command::Init(PathBuf::from(path))),
            _ => Err("init takes at most one path".to_string()),
        },
        "replay" => {
            let mut log = None;
            let mut config = None;
            let mut iter = rest.iter();
            while let Some(arg) = iter.next() {
                if arg == "--config" {
                    let path = iter.next().ok_or("--config needs a path")?;
                    config = Some(PathBuf::from(path));
                } else if let Some(path) = arg.strip_prefix("--config=") {
                    config = Some(PathBuf::from(path));
                } else if arg.starts_with("--") {
                    return Err(format!("unknown option '{arg}'"));
                } else if log.is_none() {
                    log = Some(PathBuf::from(arg));
                } else {
                    return Err(format!("unexpected argument '{arg}'"));
                }
            }
            let log = log.ok_or("replay needs a log file")?;
            Ok(Command::Replay { log, config })
        }
        other => Err(format!("unknown command '{other}'")),
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            print_usage();
            return ExitCode::from(2);
        }
    };

    match command {
        Command::Help => {
            print_usage();
            ExitCode::SUCCESS
        }
        Command::Schema(target) => match schema_json(target) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "error".red().bold(), e);
                ExitCode::FAILURE
            }
        },
        Command::Init(path) => match write_default_config(&path) {
            Ok(()) => {
                println!("  {} wrote {}", "✓".green().bold(), path.display().to_string().bold());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "error".red().bold(), e);
                ExitCode::FAILURE
            }
        },
        Command::Replay { log, config } => {
            // Held until exit so pending spans are flushed.
            let _guard = telemetry::init_tracing("sceneparse");
            match run_replay(&log, config.as_deref()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("{}: {}", "error".red().bold(), e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn schema_json(target: SchemaTarget) -> Result<String, String> {
    let schema = match target {
        SchemaTarget::Structure => schemars::schema_for!(SceneGraphMsg),
        SchemaTarget::ObjectList => schemars::schema_for!(DetectedObjectList),
        SchemaTarget::Hypotheses => schemars::schema_for!(HypothesisList),
        SchemaTarget::PointCloud => schemars::schema_for!(PointCloud),
        SchemaTarget::Poses => schemars::schema_for!(PoseBroadcast),
    };
    serde_json::to_string_pretty(&schema).map_err(|e| format!("Failed to render schema: {e}"))
}

fn write_default_config(path: &Path) -> Result<(), String> {
    if path.exists() {
        return Err(format!("{} already exists", path.display()));
    }
    config::save_to(&config::Config::default(), path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Replay
// ─────────────────────────────────────────────────────────────────────────────

fn run_replay(log: &Path, config_path: Option<&Path>) -> Result<(), String> {
    let cfg = config::load(config_path)?;
    print_banner();
    println!(
        "  Config : {}",
        config::config_path(config_path).display().to_string().bold()
    );

    let file = fs::File::open(log)
        .map_err(|e| format!("Failed to open log {}: {}", log.display(), e))?;
    let records = replay::parse_log(std::io::BufReader::new(file), &cfg.streams)?;
    println!("  Log    : {} ({} records)\n", log.display().to_string().bold(), records.len());

    // ── Shutdown flag ─────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping replay …".yellow().bold());
        shutdown_handler.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    // ── Wiring ────────────────────────────────────────────────────────────
    let transforms = Arc::new(TfBuffer::new());
    let bus = EventBus::default();
    let sink = BusSink::new(bus.clone()).with_source("sceneparse-runtime::assessor");
    let assessor = Arc::new(SceneAssessor::new(
        cfg.assessor_config(),
        Box::new(GeometricPhysics::new(cfg.physics)),
        Box::new(cfg.property_database()),
        transforms.clone(),
        Arc::new(sink),
    ));

    if let Some(path) = cfg.background_file() {
        let cloud = load_point_cloud(&path)?;
        assessor
            .on_background_cloud(&cloud)
            .map_err(|e| format!("Background {} rejected: {}", path.display(), e))?;
        println!("  {} background preloaded ({} points)", "✓".green(), cloud.len());
    }

    // Only passes that emit completion markers can be watched.
    let watched = if cfg.best_hypothesis_only {
        PassKind::Detection
    } else {
        PassKind::Hypothesis
    };
    let deadline = cfg.completion_timeout();
    let watchdog = Arc::new(Mutex::new(CompletionWatchdog::new()));
    watchdog.lock().register(watched, deadline);

    let runtime =
        tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {e}"))?;

    let stats = runtime.block_on(async {
        let printers: Vec<_> = Topic::ALL
            .iter()
            .map(|&topic| tokio::spawn(print_topic(bus.subscribe_to(topic), watchdog.clone())))
            .collect();
        let ticker = tokio::spawn(watch_liveness(watchdog.clone(), deadline, shutdown.clone()));

        let replay_shutdown = shutdown.clone();
        let result = tokio::task::spawn_blocking(move || {
            replay::replay(records, assessor, transforms, replay_shutdown)
        })
        .await;

        // Let printers drain what the last pass published.
        tokio::time::sleep(Duration::from_millis(100)).await;
        for printer in printers {
            printer.abort();
        }
        ticker.abort();
        result
    });
    let stats = stats.map_err(|e| format!("Replay task failed: {e}"))?;

    info!(
        delivered = stats.delivered,
        detection_passes = stats.detection_passes,
        hypothesis_passes = stats.hypothesis_passes,
        "replay finished"
    );
    println!();
    println!("{}", "Replay summary".bold().underline());
    println!("  records delivered : {}", stats.delivered);
    println!("  records rejected  : {}", stats.rejected);
    println!("  detection passes  : {}", stats.detection_passes);
    println!("  hypothesis passes : {}", stats.hypothesis_passes);
    println!(
        "  {} completions   : {}",
        watched,
        watchdog.lock().completions(watched)
    );
    Ok(())
}

fn load_point_cloud(path: &Path) -> Result<PointCloud, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))
}

async fn print_topic(mut rx: TopicReceiver, watchdog: Arc<Mutex<CompletionWatchdog>>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let EventPayload::Done(pass) = &event.payload {
                    watchdog.lock().record_completion(*pass);
                }
                print_event(&event);
            }
            Err(RecvError::Lagged(n)) => {
                warn!(topic = ?rx.topic(), skipped = n, "output printer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Warn once per deadline window while a watched pass stays silent.
async fn watch_liveness(
    watchdog: Arc<Mutex<CompletionWatchdog>>,
    deadline: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let period = (deadline / 2).max(Duration::from_millis(100));
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let mut wd = watchdog.lock();
        for pass in wd.overdue() {
            warn!(pass = %pass, deadline_ms = deadline.as_millis() as u64, "no completion signal within deadline");
            println!(
                "  {} no {} completion for {:?}",
                "⚠".yellow().bold(),
                pass,
                deadline
            );
            wd.rearm(pass);
        }
    }
}

fn print_event(event: &Event) {
    let ts = event.timestamp.format("%H:%M:%S%.3f").to_string().dimmed();
    match &event.payload {
        EventPayload::Poses(poses) => {
            println!(
                "{} {} {} object(s) in {}",
                ts,
                "poses    ".cyan().bold(),
                poses.transforms.len(),
                poses.parent_frame.bold()
            );
            for t in &poses.transforms {
                let p = t.transform.translation;
                println!("      {:<24} ({:>7.3}, {:>7.3}, {:>7.3})", t.child_frame, p.x, p.y, p.z);
            }
        }
        EventPayload::SceneStructure(msg) => {
            println!(
                "{} {} {} base object(s)",
                ts,
                "structure".magenta().bold(),
                msg.base_objects_id.len()
            );
            for (base, graph) in msg.base_objects_id.iter().zip(&msg.structure) {
                let levels: Vec<String> = graph
                    .nodes_level
                    .iter()
                    .map(|level| format!("[{}]", level.object_names.join(", ")))
                    .collect();
                println!("      {} ← {}", base.bold(), levels.join(" ← "));
            }
        }
        EventPayload::ObjectList(list) => {
            println!(
                "{} {} seq {} with {} object(s)",
                ts,
                "objects  ".blue().bold(),
                list.header.seq,
                list.objects.len()
            );
        }
        EventPayload::Done(pass) => {
            println!("{} {} {} pass", ts, "done     ".green().bold(), pass);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner / usage
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "sceneparse".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Sequential scene parsing replay");
    println!();
}

fn print_usage() {
    println!();
    println!("{}", "Usage".bold().underline());
    println!(
        "  {} <log.jsonl> [--config <path>]",
        "sceneparse replay".bold().cyan()
    );
    println!(
        "  {} [structure|object_list|hypotheses|point_cloud|poses]",
        "sceneparse schema".bold().cyan()
    );
    println!("  {} [<path>]", "sceneparse init".bold().cyan());
    println!("  {}", "sceneparse help".bold().cyan());
    println!();
}
