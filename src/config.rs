use std::env;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub imagen_base_url: String,
    pub imagen_model: String,
    pub imagen_ultra_model: String,
    pub log_level: String,
    pub http_timeout_seconds: u64,
    pub output_dir: PathBuf,
    pub history_display_limit: usize,
    pub request_max_attempts: usize,
    pub request_retry_base_delay_ms: u64,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Config {
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            imagen_base_url: env_string(
                "IMAGEN_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            imagen_model: env_string("IMAGEN_MODEL", "imagen-4.0-generate-preview-06-06"),
            imagen_ultra_model: env_string(
                "IMAGEN_ULTRA_MODEL",
                "imagen-4.0-ultra-generate-preview-06-06",
            ),
            log_level: env_string("LOG_LEVEL", "info"),
            http_timeout_seconds: env_u64("HTTP_TIMEOUT_SECONDS", 60),
            output_dir: PathBuf::from(env_string("OUTPUT_DIR", "output")),
            history_display_limit: env_usize("HISTORY_DISPLAY_LIMIT", 10),
            request_max_attempts: env_usize("REQUEST_MAX_ATTEMPTS", 3),
            request_retry_base_delay_ms: env_u64("REQUEST_RETRY_BASE_DELAY_MS", 900),
        })
    }

    pub fn has_api_key(&self) -> bool {
        !self.gemini_api_key.trim().is_empty()
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}
