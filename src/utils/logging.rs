use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::CONFIG;

pub struct LoggingGuards {
    _file_guard: WorkerGuard,
    _timing_guard: WorkerGuard,
    _json_file_guard: WorkerGuard,
    _json_timing_guard: WorkerGuard,
}

#[derive(Debug, Clone)]
pub struct LogTail {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

fn parse_log_level(value: &str) -> LevelFilter {
    match value.trim().to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" | "warning" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}

fn general_filter() -> Targets {
    Targets::new()
        .with_default(parse_log_level(&CONFIG.log_level))
        .with_target("studio.timing", LevelFilter::OFF)
        .with_target("hyper", LevelFilter::WARN)
        .with_target("hyper_util", LevelFilter::WARN)
        .with_target("reqwest", LevelFilter::WARN)
}

fn timing_filter() -> Targets {
    Targets::new()
        .with_default(LevelFilter::OFF)
        .with_target("studio.timing", LevelFilter::INFO)
}

pub fn init_logging() -> LoggingGuards {
    let logs_dir = Path::new("logs");
    if let Err(err) = fs::create_dir_all(logs_dir) {
        eprintln!("Failed to create logs directory: {err}");
    }

    let file_appender = tracing_appender::rolling::daily(logs_dir, "studio.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let timing_appender = tracing_appender::rolling::daily(logs_dir, "timing.log");
    let (timing_writer, timing_guard) = tracing_appender::non_blocking(timing_appender);

    let json_file_appender = tracing_appender::rolling::daily(logs_dir, "studio.jsonl");
    let (json_file_writer, json_file_guard) = tracing_appender::non_blocking(json_file_appender);

    let json_timing_appender = tracing_appender::rolling::daily(logs_dir, "timing.jsonl");
    let (json_timing_writer, json_timing_guard) =
        tracing_appender::non_blocking(json_timing_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(general_filter());
    let timing_layer = tracing_subscriber::fmt::layer()
        .with_writer(timing_writer)
        .with_ansi(false)
        .with_filter(timing_filter());
    let json_file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(json_file_writer)
        .with_filter(general_filter());
    let json_timing_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(json_timing_writer)
        .with_filter(timing_filter());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(timing_layer)
        .with(json_file_layer)
        .with(json_timing_layer)
        .init();

    LoggingGuards {
        _file_guard: file_guard,
        _timing_guard: timing_guard,
        _json_file_guard: json_file_guard,
        _json_timing_guard: json_timing_guard,
    }
}

pub fn read_recent_log_lines(base_name: &str, max_lines: usize) -> io::Result<Option<LogTail>> {
    if max_lines == 0 {
        return Ok(None);
    }

    let Some(path) = find_latest_log_file(base_name)? else {
        return Ok(None);
    };

    let lines = tail_file_lines(&path, max_lines)?;
    Ok(Some(LogTail { path, lines }))
}

fn find_latest_log_file(base_name: &str) -> io::Result<Option<PathBuf>> {
    let logs_dir = Path::new("logs");
    if !logs_dir.exists() {
        return Ok(None);
    }

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(logs_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(base_name) {
            continue;
        }

        let modified = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);

        match &newest {
            Some((current_time, _)) if modified <= *current_time => {}
            _ => newest = Some((modified, path)),
        }
    }

    Ok(newest.map(|(_, path)| path))
}

fn tail_file_lines(path: &Path, max_lines: usize) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut ring = VecDeque::with_capacity(max_lines);

    for line in reader.lines() {
        let line = line?;
        if ring.len() == max_lines {
            ring.pop_front();
        }
        ring.push_back(line);
    }

    Ok(ring.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn timing_events_go_to_the_timing_layers_only() {
        let general = general_filter();
        let timing = timing_filter();

        assert!(!general.would_enable("studio.timing", &Level::INFO));
        assert!(timing.would_enable("studio.timing", &Level::INFO));
        assert!(!timing.would_enable("imagen_studio::llm::imagen", &Level::INFO));
    }

    #[test]
    fn noisy_http_targets_are_clamped_to_warn() {
        let general = general_filter();
        assert!(!general.would_enable("hyper", &Level::INFO));
        assert!(general.would_enable("hyper", &Level::WARN));
        assert!(!general.would_enable("reqwest", &Level::DEBUG));
    }

    #[test]
    fn log_level_strings_parse_with_an_info_fallback() {
        assert_eq!(parse_log_level("debug"), LevelFilter::DEBUG);
        assert_eq!(parse_log_level(" WARN "), LevelFilter::WARN);
        assert_eq!(parse_log_level("gibberish"), LevelFilter::INFO);
    }
}
