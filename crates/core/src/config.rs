//! Numeric tunables for the sync engine, overridable from `MODQ_*` env vars.

use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Quiet period before queued mutations are flushed.
    pub debounce: Duration,
    /// Max mutations applied per flush.
    pub flush_batch_size: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_reconnect_attempts: u32,
    /// A dial stuck this long counts as a failed attempt.
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub batch_chunk_size: usize,
    pub batch_chunk_pause: Duration,
    pub selection_clear_delay: Duration,
    pub page_size: usize,
    /// Fraction of scrollable extent that triggers the next page.
    pub scroll_threshold: f32,
    pub scroll_min_interval: Duration,
    pub render_buffer: usize,
    /// Pull refresh period once the push channel is given up on.
    pub fallback_refresh_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            flush_batch_size: 50,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(30_000),
            max_reconnect_attempts: 10,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            batch_chunk_size: 20,
            batch_chunk_pause: Duration::from_millis(200),
            selection_clear_delay: Duration::from_millis(1000),
            page_size: 20,
            scroll_threshold: 0.95,
            scroll_min_interval: Duration::from_millis(2000),
            render_buffer: 5,
            fallback_refresh_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key = %key, value = %raw, "ignoring unparsable tunable; using default");
            None
        }
    }
}

fn env_ms(key: &str, default: Duration) -> Duration {
    env_parse::<u64>(key).map(Duration::from_millis).unwrap_or(default)
}

impl SyncConfig {
    /// Defaults overridden by any `MODQ_*` variables present.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            debounce: env_ms("MODQ_DEBOUNCE_MS", d.debounce),
            flush_batch_size: env_parse("MODQ_FLUSH_BATCH").unwrap_or(d.flush_batch_size).max(1),
            backoff_base: env_ms("MODQ_BACKOFF_BASE_MS", d.backoff_base),
            backoff_cap: env_ms("MODQ_BACKOFF_CAP_MS", d.backoff_cap),
            max_reconnect_attempts: env_parse("MODQ_MAX_RECONNECTS").unwrap_or(d.max_reconnect_attempts),
            connect_timeout: env_ms("MODQ_CONNECT_TIMEOUT_MS", d.connect_timeout),
            heartbeat_interval: env_ms("MODQ_HEARTBEAT_MS", d.heartbeat_interval),
            batch_chunk_size: env_parse("MODQ_CHUNK_SIZE").unwrap_or(d.batch_chunk_size).max(1),
            batch_chunk_pause: env_ms("MODQ_CHUNK_PAUSE_MS", d.batch_chunk_pause),
            selection_clear_delay: env_ms("MODQ_SELECTION_CLEAR_MS", d.selection_clear_delay),
            page_size: env_parse("MODQ_PAGE_SIZE").unwrap_or(d.page_size).max(1),
            scroll_threshold: env_parse::<f32>("MODQ_SCROLL_THRESHOLD")
                .filter(|t| *t > 0.0 && *t <= 1.0)
                .unwrap_or(d.scroll_threshold),
            scroll_min_interval: env_ms("MODQ_SCROLL_MIN_INTERVAL_MS", d.scroll_min_interval),
            render_buffer: env_parse("MODQ_RENDER_BUFFER").unwrap_or(d.render_buffer),
            fallback_refresh_interval: env_ms("MODQ_FALLBACK_REFRESH_MS", d.fallback_refresh_interval),
            request_timeout: env_ms("MODQ_REQUEST_TIMEOUT_MS", d.request_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_tunables() {
        let c = SyncConfig::default();
        assert_eq!(c.debounce, Duration::from_millis(100));
        assert_eq!(c.flush_batch_size, 50);
        assert_eq!(c.backoff_base, Duration::from_millis(1000));
        assert_eq!(c.backoff_cap, Duration::from_millis(30_000));
        assert_eq!(c.max_reconnect_attempts, 10);
        assert_eq!(c.batch_chunk_size, 20);
        assert_eq!(c.batch_chunk_pause, Duration::from_millis(200));
        assert_eq!(c.scroll_threshold, 0.95);
        assert_eq!(c.scroll_min_interval, Duration::from_millis(2000));
        assert_eq!(c.render_buffer, 5);
    }

    #[test]
    fn env_overrides_and_bad_values_fall_back() {
        std::env::set_var("MODQ_CHUNK_SIZE", "7");
        std::env::set_var("MODQ_DEBOUNCE_MS", "oops");
        let c = SyncConfig::from_env();
        std::env::remove_var("MODQ_CHUNK_SIZE");
        std::env::remove_var("MODQ_DEBOUNCE_MS");
        assert_eq!(c.batch_chunk_size, 7);
        assert_eq!(c.debounce, Duration::from_millis(100));
    }
}
