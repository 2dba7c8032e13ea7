use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // AI provider
    pub anthropic_api_key: String,
    pub analysis_model: String,
    pub signal_model: String,

    // Reaper
    pub stale_run_minutes: i64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            anthropic_api_key: required_env("ANTHROPIC_API_KEY"),
            analysis_model: env::var("CLAIMLENS_ANALYSIS_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5-20250929".to_string()),
            signal_model: env::var("CLAIMLENS_SIGNAL_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            stale_run_minutes: env::var("CLAIMLENS_STALE_RUN_MINUTES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .expect("CLAIMLENS_STALE_RUN_MINUTES must be a number"),
        }
    }

    /// Log the loaded config with secrets redacted.
    pub fn log_redacted(&self) {
        tracing::info!(
            analysis_model = %self.analysis_model,
            signal_model = %self.signal_model,
            stale_run_minutes = self.stale_run_minutes,
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
