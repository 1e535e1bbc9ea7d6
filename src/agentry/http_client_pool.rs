//! Shared `reqwest` clients, one per base URL.
//!
//! Model providers and tool servers are called on every turn. Reusing one pooled client
//! per base URL keeps TCP/TLS connections warm instead of paying a handshake per call.
//! Per-request timeouts are set on each request, not on the pooled client.

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    static ref CLIENT_POOL: Mutex<HashMap<String, reqwest::Client>> = Mutex::new(HashMap::new());
}

/// Creates or retrieves the shared HTTP client for the given base URL.
///
/// The client keeps up to 32 idle connections per host for 90 seconds, sends TCP
/// keepalives every 60 seconds and gives up connecting after 30 seconds.
pub fn get_or_create_client(base_url: &str) -> reqwest::Client {
    let mut pool = CLIENT_POOL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    pool.entry(base_url.to_string())
        .or_insert_with(create_pooled_client)
        .clone()
}

fn create_pooled_client() -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|err| {
            log::warn!("pooled HTTP client setup failed ({}), using defaults", err);
            reqwest::Client::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_keeps_one_entry_per_base_url() {
        let url = "http://pool-test.invalid/mcp";
        for _ in 0..5 {
            let _client = get_or_create_client(url);
        }
        let _other = get_or_create_client("http://pool-test-other.invalid/v1");

        let pool = CLIENT_POOL.lock().unwrap();
        assert!(pool.contains_key(url));
        assert!(pool.contains_key("http://pool-test-other.invalid/v1"));
    }
}
