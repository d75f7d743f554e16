// src/config.rs
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Infrastructure settings only; all domain behavior is fixed.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub store_node: String,
    pub store_deadline: Duration,
    pub jwt_secret: String,
    pub advisory_endpoint: String,
    /// Run against the in-memory store instead of ScyllaDB.
    pub memory_store: bool,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let bind_addr = var_or("TRADESIM_BIND", "127.0.0.1:3030")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 3030)));
        let deadline_ms = var_or("TRADESIM_STORE_DEADLINE_MS", "5000")
            .parse()
            .unwrap_or(5000);

        Self {
            bind_addr,
            store_node: var_or("TRADESIM_STORE_NODE", "127.0.0.1:9042"),
            store_deadline: Duration::from_millis(deadline_ms),
            jwt_secret: var_or("TRADESIM_JWT_SECRET", "dev_secret"),
            advisory_endpoint: var_or("TRADESIM_ADVISORY_URL", "http://127.0.0.1:8000/model/"),
            memory_store: env::var("TRADESIM_MEMORY_STORE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_env() {
        // Only read keys that the test environment does not set.
        let cfg = Config::from_env();
        assert_eq!(cfg.store_deadline, Duration::from_millis(5000));
        assert!(!cfg.jwt_secret.is_empty());
        assert!(cfg.advisory_endpoint.starts_with("http"));
    }
}
