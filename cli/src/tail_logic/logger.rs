use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const LOG_PREFIX: &str = "realtime-tail-";

/// Socket and HTTP internals that drown the tail at debug level.
const NOISY_TARGETS: [&str; 4] = ["tungstenite", "tokio_tungstenite", "reqwest", "hyper_util"];

/// Routes `log` output to stdout and a fresh file under `log_dir`, pruning
/// all but the previous run's file. Returns the path of this run's file.
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<PathBuf> {
    fs::create_dir_all(log_dir).with_context(|| format!("creating log dir {}", log_dir.display()))?;
    prune_logs(log_dir, 1)?;

    let log_path = log_dir.join(format!(
        "{LOG_PREFIX}{}.log",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));
    let file = fern::log_file(&log_path).with_context(|| format!("opening {}", log_path.display()))?;

    dispatch(parse_level(log_level))
        .chain(std::io::stdout())
        .chain(file)
        .apply()
        .context("installing logger")?;

    Ok(log_path)
}

fn dispatch(level: LevelFilter) -> fern::Dispatch {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {:<5} {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level);
    if level < LevelFilter::Trace {
        for target in NOISY_TARGETS {
            dispatch = dispatch.level_for(target, level.min(LevelFilter::Warn));
        }
    }
    dispatch
}

fn parse_level(name: &str) -> LevelFilter {
    LevelFilter::from_str(name.trim()).unwrap_or_else(|_| {
        eprintln!("Unknown log level '{name}', using info");
        LevelFilter::Info
    })
}

/// Deletes this tool's log files beyond the `keep` newest.
fn prune_logs(log_dir: &Path, keep: usize) -> Result<usize> {
    let mut logs: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(LOG_PREFIX) && name.ends_with(".log")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, entry.path()))
        })
        .collect();
    logs.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in logs.into_iter().skip(keep) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Could not remove old log {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}
