use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// Reserved store keys
pub const PARAMS_KEY: &str = "PARAMS";
pub const INPUT_KEY: &str = "INPUT";
pub const PAGES_KEY: &str = "PAGES";
pub const ACTIVE_PAGE_KEY: &str = "ACTIVE_PAGE";
pub const BASE_DIR_KEY: &str = "BASE_DIR";
pub const CURRENT_DIR_KEY: &str = "CURRENT_DIR";
pub const INDENT_KEY: &str = "INDENT";
pub const PAYLOAD_ID_KEY: &str = "PAYLOAD_ID";

/// Environment variables with this prefix are copied into every run's store.
pub const ENV_PREFIX: &str = "GRABBER_";
pub const DEFAULT_PAGE_KEY: &str = "default";
pub const INDENT_STEP: usize = 2;

pub const DEFAULT_GRABS_DIR: &str = "grabs";
pub const DEFAULT_RESOURCES_DIR: &str = "resources";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 900_000;
pub const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 100;

/// Process-wide settings shared by every run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub grabs_dir: PathBuf,
    pub resources_dir: PathBuf,
    pub port: u16,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max_requests: u32,
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grabs_dir: PathBuf::from(DEFAULT_GRABS_DIR),
            resources_dir: PathBuf::from(DEFAULT_RESOURCES_DIR),
            port: DEFAULT_PORT,
            rate_limit_window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            headless: true,
            chrome_executable: None,
        }
    }
}

impl Settings {
    /// Read overrides from the process environment. Unparseable values fall
    /// back to the defaults with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            grabs_dir: std::env::var("GRABS_DIR").map(PathBuf::from).unwrap_or(defaults.grabs_dir),
            resources_dir: std::env::var("RESOURCES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.resources_dir),
            port: env_or("PORT", defaults.port),
            rate_limit_window_ms: env_or("GRABBER_RATE_LIMIT_WINDOW_MS", defaults.rate_limit_window_ms),
            rate_limit_max_requests: env_or(
                "GRABBER_RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            ),
            headless: defaults.headless,
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().map(PathBuf::from),
        }
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "Ignoring unparseable environment value");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_settings_defaults() {
        std::env::remove_var("PORT");
        std::env::remove_var("GRABBER_RATE_LIMIT_WINDOW_MS");
        std::env::remove_var("GRABBER_RATE_LIMIT_MAX_REQUESTS");

        let settings = Settings::from_env();
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.rate_limit_window_ms, 900_000);
        assert_eq!(settings.rate_limit_max_requests, 100);
        assert_eq!(settings.rate_limit_window(), Duration::from_secs(900));
    }

    #[test]
    #[serial]
    fn test_settings_env_overrides() {
        std::env::set_var("PORT", "8080");
        std::env::set_var("GRABBER_RATE_LIMIT_MAX_REQUESTS", "5");
        std::env::set_var("GRABBER_RATE_LIMIT_WINDOW_MS", "not-a-number");

        let settings = Settings::from_env();
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.rate_limit_max_requests, 5);
        assert_eq!(settings.rate_limit_window_ms, DEFAULT_RATE_LIMIT_WINDOW_MS);

        std::env::remove_var("PORT");
        std::env::remove_var("GRABBER_RATE_LIMIT_MAX_REQUESTS");
        std::env::remove_var("GRABBER_RATE_LIMIT_WINDOW_MS");
    }
}
