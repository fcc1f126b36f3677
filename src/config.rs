use std::{sync::LazyLock, time::Duration};

pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_env);

/// Runtime options, read from the environment once on first use.
/// `LADDER_JWT_SECRET` is checked separately at server startup (see
/// `app::run`); everything here has a default so tests and tools can run
/// without a populated environment.
#[derive(Clone, Debug)]
pub struct Config {
    pub access_token_ttl_ms: i64,
    pub refresh_token_ttl_days: u64,
    pub confirm_window_secs: u64,
    pub rematch_window_secs: u64,
    pub lock_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            access_token_ttl_ms: env_or("LADDER_ACCESS_TOKEN_TTL_MS", 3_600_000),
            refresh_token_ttl_days: env_or("LADDER_REFRESH_TOKEN_TTL_DAYS", 30),
            confirm_window_secs: env_or("LADDER_CONFIRM_WINDOW_SECS", 20),
            rematch_window_secs: env_or("LADDER_REMATCH_WINDOW_SECS", 20),
            lock_timeout_ms: env_or("LADDER_LOCK_TIMEOUT_MS", 5_000),
        }
    }

    pub fn rematch_window(&self) -> Duration {
        Duration::from_secs(self.rematch_window_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            panic!("{} must be a valid {}", key, std::any::type_name::<T>())
        }),
        Err(_) => default,
    }
}
