use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub scheduling_api_url: String,
    pub scheduling_api_key: String,
    pub history_depth: usize,
    pub undo_visible_seconds: i64,
    pub board_window_days: i64,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scheduling_api_url: String::new(),
            scheduling_api_key: String::new(),
            history_depth: 10,
            undo_visible_seconds: 20,
            board_window_days: 14,
            port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            scheduling_api_url: env::var("SCHEDULING_API_URL")
                .unwrap_or_else(|_| {
                    warn!("SCHEDULING_API_URL not set, using empty value");
                    String::new()
                }),
            scheduling_api_key: env::var("SCHEDULING_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("SCHEDULING_API_KEY not set, using empty value");
                    String::new()
                }),
            history_depth: parse_or("BOARD_HISTORY_DEPTH", defaults.history_depth),
            undo_visible_seconds: parse_or("BOARD_UNDO_VISIBLE_SECONDS", defaults.undo_visible_seconds),
            board_window_days: parse_or("BOARD_WINDOW_DAYS", defaults.board_window_days),
            port: parse_or("PORT", defaults.port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.scheduling_api_url.is_empty() && !self.scheduling_api_key.is_empty()
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
