use std::path::PathBuf;

use crate::sync::RemoteConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub sync_timeout_secs: u64,
    pub question_bank_dir: PathBuf,
    pub question_bank_version: i64,
    pub session_question_count: usize,
    pub device_id: String,
    pub language: String,
    pub log_level: String,
    /// Directory for the daily log file; `None` keeps logging on stderr only.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let db_path = std::env::var("PROGRESS_DB_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/progress.db"));

        let api_base_url = non_empty_var("PROGRESS_API_BASE_URL");
        let api_token = non_empty_var("PROGRESS_API_TOKEN");

        let sync_timeout_secs = std::env::var("SYNC_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(30);

        let question_bank_dir = std::env::var("QUESTION_BANK_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./questions"));

        let question_bank_version = std::env::var("QUESTION_BANK_VERSION")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(1);

        let session_question_count = std::env::var("SESSION_QUESTION_COUNT")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|count| *count > 0)
            .unwrap_or(10);

        let device_id = non_empty_var("DEVICE_ID").unwrap_or_else(|| "unknown-device".to_string());
        let language = non_empty_var("PROGRESS_LANGUAGE").unwrap_or_else(|| "en".to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let log_dir = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
            .then(|| PathBuf::from(non_empty_var("LOG_DIR").unwrap_or_else(|| "./logs".to_string())));

        Self {
            db_path,
            api_base_url,
            api_token,
            sync_timeout_secs,
            question_bank_dir,
            question_bank_version,
            session_question_count,
            device_id,
            language,
            log_level,
            log_dir,
        }
    }

    /// `None` when no API base URL is configured, which disables cloud sync.
    pub fn remote_config(&self) -> Option<RemoteConfig> {
        self.api_base_url.as_ref().map(|base| RemoteConfig {
            api_base_url: base.clone(),
            auth_token: self.api_token.clone(),
            timeout_secs: self.sync_timeout_secs,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    // one test touches the environment so parallel tests never race on it
    #[test]
    fn test_from_env_defaults_and_overrides() {
        for key in [
            "PROGRESS_DB_PATH",
            "PROGRESS_API_BASE_URL",
            "PROGRESS_API_TOKEN",
            "SYNC_TIMEOUT_SECS",
            "SESSION_QUESTION_COUNT",
            "DEVICE_ID",
            "ENABLE_FILE_LOGS",
            "LOG_DIR",
        ] {
            std::env::remove_var(key);
        }

        let config = Config::from_env();
        assert_eq!(config.db_path, PathBuf::from("./data/progress.db"));
        assert_eq!(config.sync_timeout_secs, 30);
        assert_eq!(config.session_question_count, 10);
        assert_eq!(config.device_id, "unknown-device");
        assert!(config.remote_config().is_none());
        assert!(config.log_dir.is_none());

        std::env::set_var("PROGRESS_API_BASE_URL", "https://api.example.com");
        std::env::set_var("PROGRESS_API_TOKEN", "secret");
        std::env::set_var("SYNC_TIMEOUT_SECS", "not-a-number");
        std::env::set_var("SESSION_QUESTION_COUNT", "0");
        std::env::set_var("ENABLE_FILE_LOGS", "1");

        let config = Config::from_env();
        let remote = config.remote_config().expect("remote configured");
        assert_eq!(remote.api_base_url, "https://api.example.com");
        assert_eq!(remote.auth_token.as_deref(), Some("secret"));
        assert_eq!(remote.timeout_secs, 30);
        assert_eq!(config.session_question_count, 10);
        assert_eq!(config.log_dir, Some(PathBuf::from("./logs")));

        for key in [
            "PROGRESS_API_BASE_URL",
            "PROGRESS_API_TOKEN",
            "SYNC_TIMEOUT_SECS",
            "SESSION_QUESTION_COUNT",
            "ENABLE_FILE_LOGS",
        ] {
            std::env::remove_var(key);
        }
    }
}
