//! Server configuration read from the environment (and `.env`).
//!
//! Every setting has a default, so a bare `cargo run` works locally.

use std::{net::SocketAddr, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    /// Env: `BIND_ADDR`, default `0.0.0.0:5000`.
    pub bind_addr: SocketAddr,

    /// Env: `DATABASE_URL`, default `sqlite://silentpairs.db?mode=rwc`.
    pub database_url: String,

    /// How often the liveness sweep runs.
    /// Env: `SWEEP_INTERVAL_SECS`, default 30.
    pub sweep_interval: Duration,

    /// Silence after which a connection is considered gone.
    /// Env: `STALE_AFTER_SECS`, default 300.
    pub stale_after: Duration,

    /// Outbound events buffered per connection.
    /// Env: `SEND_QUEUE`, default 256.
    pub send_queue: usize,

    /// Candidates tried per search before waiting to be picked by someone else.
    /// Env: `MATCH_ATTEMPTS`, default 3.
    pub match_attempts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 5000).into(),
            database_url: "sqlite://silentpairs.db?mode=rwc".to_owned(),
            sweep_interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(5 * 60),
            send_queue: 256,
            match_attempts: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = dotenv::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(addr) = parse_var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(secs) = parse_var("SWEEP_INTERVAL_SECS") {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var("STALE_AFTER_SECS") {
            config.stale_after = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var::<usize>("SEND_QUEUE").filter(|size| *size > 0) {
            config.send_queue = size;
        }
        if let Some(attempts) = parse_var::<usize>("MATCH_ATTEMPTS").filter(|n| *n > 0) {
            config.match_attempts = attempts;
        }

        config
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    let value = dotenv::var(key).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timings() {
        let config = Config::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.stale_after, Duration::from_secs(300));
        assert_eq!(config.bind_addr.port(), 5000);
    }

    #[test]
    fn unset_variable_yields_none() {
        assert_eq!(parse_var::<u64>("SILENTPAIRS_SURELY_UNSET_VARIABLE"), None);
    }
}
