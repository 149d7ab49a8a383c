use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host the backend binds on
    pub host: String,
    /// First port the backend may bind
    pub port_range_start: u16,
    /// Last port the backend may bind (inclusive)
    pub port_range_end: u16,
    /// Hard cap on a single health probe
    pub probe_timeout: Duration,
    /// Delay between liveness polls while confirming a launch
    pub poll_interval: Duration,
    /// Liveness polls per port before giving up on that port
    pub poll_attempts: u32,
    /// Period of the connection monitor
    pub monitor_interval: Duration,
    /// Age after which an in-flight start sequence is presumed abandoned
    pub stuck_threshold: Duration,
    /// Pause between launch attempts on successive ports
    pub retry_delay: Duration,
    /// Pause between a manual reset and the follow-up find-or-start
    pub reset_delay: Duration,
    /// Command candidates for the backend entry point, tried in order
    pub backend_command: Vec<String>,
    /// Arguments passed to the backend command
    pub backend_args: Vec<String>,
    /// Working directory the backend runs in
    pub backend_dir: PathBuf,
    /// Process name matched by the system-wide kill fallback
    pub backend_process_name: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_command = env_csv("BACKEND_COMMAND", &["python", "python3"]);
        let backend_process_name = std::env::var("BACKEND_PROCESS_NAME")
            .unwrap_or_else(|_| backend_command.first().cloned().unwrap_or_default());

        let config = Self {
            host: env_str("BACKEND_HOST", "127.0.0.1"),
            port_range_start: env_parse("BACKEND_PORT_RANGE_START", 5000)?,
            port_range_end: env_parse("BACKEND_PORT_RANGE_END", 5010)?,
            probe_timeout: Duration::from_millis(env_parse("PROBE_TIMEOUT_MS", 1000)?),
            poll_interval: Duration::from_millis(env_parse("HEALTH_POLL_INTERVAL_MS", 500)?),
            poll_attempts: env_parse("HEALTH_POLL_ATTEMPTS", 60)?,
            monitor_interval: Duration::from_millis(env_parse("MONITOR_INTERVAL_MS", 3000)?),
            stuck_threshold: Duration::from_secs(env_parse("STUCK_THRESHOLD_SECS", 15)?),
            retry_delay: Duration::from_millis(env_parse("RETRY_DELAY_MS", 500)?),
            reset_delay: Duration::from_millis(env_parse("RESET_DELAY_MS", 1500)?),
            backend_command,
            backend_args: env_csv("BACKEND_ARGS", &["server/server.py"]),
            backend_dir: PathBuf::from(env_str("BACKEND_DIR", ".")),
            backend_process_name,
        };
        config.validate()?;
        Ok(config)
    }

    /// Inclusive candidate port range.
    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.port_range_start == 0 {
            anyhow::bail!("BACKEND_PORT_RANGE_START must be nonzero");
        }
        if self.port_range_start > self.port_range_end {
            anyhow::bail!(
                "backend port range is empty ({}-{})",
                self.port_range_start,
                self.port_range_end
            );
        }
        if self.backend_command.is_empty() {
            anyhow::bail!("BACKEND_COMMAND must name at least one command");
        }
        // A hung probe must never starve the next monitor cycle.
        if self.probe_timeout >= self.monitor_interval {
            anyhow::bail!(
                "PROBE_TIMEOUT_MS ({:?}) must stay below MONITOR_INTERVAL_MS ({:?})",
                self.probe_timeout,
                self.monitor_interval
            );
        }
        Ok(())
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_config;

    #[test]
    fn port_range_is_inclusive() {
        let config = test_config(5000, 5002);
        assert_eq!(config.port_range().collect::<Vec<_>>(), vec![5000, 5001, 5002]);
    }

    #[test]
    fn rejects_inverted_range() {
        let mut config = test_config(5000, 5002);
        config.port_range_start = 5002;
        config.port_range_end = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_start_port() {
        let mut config = test_config(5000, 5002);
        config.port_range_start = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_command_list() {
        let mut config = test_config(5000, 5002);
        config.backend_command.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_probe_timeout_at_or_above_monitor_interval() {
        let mut config = test_config(5000, 5002);
        config.probe_timeout = config.monitor_interval;
        assert!(config.validate().is_err());
    }
}
