//! Engine configuration
//!
//! Timing and paging knobs for rollouts. Everything has a default and can be
//! overridden from the environment, so operators can tune health checks for
//! slow-starting services without touching `hoist.yml`.

use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay between health probes
    pub health_interval: Duration,

    /// How long a new container has to become healthy
    pub health_timeout: Duration,

    /// Page size requested from each catalog when merging catalogs
    pub builds_fetch_limit: usize,

    /// SSH connection timeout
    pub ssh_connect_timeout: Duration,

    /// Timeout for post-deploy webhook delivery
    pub hook_timeout: Duration,
}

impl EngineConfig {
    /// Creates a configuration with defaults
    pub fn new() -> Self {
        Self {
            health_interval: Duration::from_secs(2),
            health_timeout: Duration::from_secs(120),
            builds_fetch_limit: 100,
            ssh_connect_timeout: Duration::from_secs(10),
            hook_timeout: Duration::from_secs(5),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Optional environment variables:
    /// - HOIST_HEALTH_INTERVAL (seconds, default: 2)
    /// - HOIST_HEALTH_TIMEOUT (seconds, default: 120)
    /// - HOIST_BUILDS_FETCH_LIMIT (default: 100)
    /// - HOIST_SSH_CONNECT_TIMEOUT (seconds, default: 10)
    /// - HOIST_HOOK_TIMEOUT (seconds, default: 5)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::new();

        let secs = |name: &str, default: Duration| -> anyhow::Result<Duration> {
            match lookup(name) {
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| anyhow::anyhow!("{} must be a whole number of seconds, got {:?}", name, value)),
                None => Ok(default),
            }
        };

        let builds_fetch_limit = match lookup("HOIST_BUILDS_FETCH_LIMIT") {
            Some(value) => value.trim().parse::<usize>().map_err(|_| {
                anyhow::anyhow!("HOIST_BUILDS_FETCH_LIMIT must be a number, got {:?}", value)
            })?,
            None => defaults.builds_fetch_limit,
        };

        let config = Self {
            health_interval: secs("HOIST_HEALTH_INTERVAL", defaults.health_interval)?,
            health_timeout: secs("HOIST_HEALTH_TIMEOUT", defaults.health_timeout)?,
            builds_fetch_limit,
            ssh_connect_timeout: secs("HOIST_SSH_CONNECT_TIMEOUT", defaults.ssh_connect_timeout)?,
            hook_timeout: secs("HOIST_HOOK_TIMEOUT", defaults.hook_timeout)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.health_interval.is_zero() {
            anyhow::bail!("health_interval must be greater than 0");
        }

        if self.health_timeout.is_zero() {
            anyhow::bail!("health_timeout must be greater than 0");
        }

        if self.health_interval >= self.health_timeout {
            anyhow::bail!("health_interval must be shorter than health_timeout");
        }

        if self.builds_fetch_limit == 0 {
            anyhow::bail!("builds_fetch_limit must be greater than 0");
        }

        if self.ssh_connect_timeout.is_zero() {
            anyhow::bail!("ssh_connect_timeout must be greater than 0");
        }

        if self.hook_timeout.is_zero() {
            anyhow::bail!("hook_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.health_interval, Duration::from_secs(2));
        assert_eq!(config.health_timeout, Duration::from_secs(120));
        assert_eq!(config.builds_fetch_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_lookup() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("HOIST_HEALTH_INTERVAL", "5"),
            ("HOIST_HEALTH_TIMEOUT", "300"),
            ("HOIST_BUILDS_FETCH_LIMIT", "50"),
        ]))
        .unwrap();

        assert_eq!(config.health_interval, Duration::from_secs(5));
        assert_eq!(config.health_timeout, Duration::from_secs(300));
        assert_eq!(config.builds_fetch_limit, 50);
        assert_eq!(config.ssh_connect_timeout, Duration::from_secs(10));
        assert_eq!(config.hook_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_from_lookup_rejects_garbage() {
        let err = EngineConfig::from_lookup(lookup(&[("HOIST_HEALTH_TIMEOUT", "2m")])).unwrap_err();
        assert!(err.to_string().contains("HOIST_HEALTH_TIMEOUT"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());

        config.health_interval = Duration::ZERO;
        assert!(config.validate().is_err());

        config.health_interval = Duration::from_secs(120);
        assert!(config.validate().is_err());

        config.health_interval = Duration::from_secs(2);
        config.builds_fetch_limit = 0;
        assert!(config.validate().is_err());

        config.builds_fetch_limit = 10;
        assert!(config.validate().is_ok());
    }
}
