use std::env;
use std::time::Duration;

const DEFAULT_HISTORY_LINES: usize = 1000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_ENDPOINT_POLL_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub history_capacity: usize,
    pub write_timeout: Duration,
    pub endpoint_poll_interval: Duration,
    /// Copy child output to the daemon's own stdout.
    pub echo_output: bool,
    /// Install SIGINT/SIGTERM handling for the run loop.
    pub handle_signals: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            history_capacity: env::var("WCP_HISTORY_LINES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HISTORY_LINES),
            write_timeout: Duration::from_millis(
                env::var("WCP_WRITE_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_WRITE_TIMEOUT_MS),
            ),
            endpoint_poll_interval: Duration::from_millis(
                env::var("WCP_ENDPOINT_POLL_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_ENDPOINT_POLL_MS),
            ),
            echo_output: true,
            handle_signals: true,
        }
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_endpoint_poll_interval(mut self, interval: Duration) -> Self {
        self.endpoint_poll_interval = interval;
        self
    }

    pub fn with_echo_output(mut self, echo: bool) -> Self {
        self.echo_output = echo;
        self
    }

    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        if env::var("WCP_HISTORY_LINES").is_err() {
            assert_eq!(config.history_capacity, DEFAULT_HISTORY_LINES);
        }
        if env::var("WCP_WRITE_TIMEOUT_MS").is_err() {
            assert_eq!(
                config.write_timeout,
                Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS)
            );
        }
        assert!(config.echo_output);
        assert!(config.handle_signals);
    }

    #[test]
    fn test_builder_pattern() {
        let config = DaemonConfig::default()
            .with_history_capacity(50)
            .with_write_timeout(Duration::from_millis(100))
            .with_endpoint_poll_interval(Duration::from_millis(20))
            .with_echo_output(false)
            .with_signal_handling(false);

        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.write_timeout, Duration::from_millis(100));
        assert_eq!(config.endpoint_poll_interval, Duration::from_millis(20));
        assert!(!config.echo_output);
        assert!(!config.handle_signals);
    }
}
