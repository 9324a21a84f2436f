use crate::*;
use std::env::var;
use std::str::FromStr;
use std::time::Duration;

/// Client settings
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// `ws://` URL of the server, or `host:port` for line-framed TCP
    pub server_address: String,

    /// How long a query may wait for its answer
    pub request_timeout: Duration,

    /// How often expired queries are failed
    pub reap_interval: Duration,

    /// How many times a message that arrived too early is re-delivered
    pub max_reprocessing: u32,

    /// Delay before re-delivering such a message
    pub reprocessing_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_address: "127.0.0.1:9000".to_owned(),
            request_timeout: Duration::from_secs(5),
            reap_interval: Duration::from_secs(1),
            max_reprocessing: 5,
            reprocessing_delay: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Defaults overridden by `LAONET_*` environment variables
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|name| var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Config::default();

        if let Some(address) = lookup("LAONET_SERVER_ADDRESS") {
            if address.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "LAONET_SERVER_ADDRESS must not be empty".into(),
                ));
            }
            config.server_address = address;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "LAONET_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(millis) = parse_var::<u64>(&lookup, "LAONET_REAP_INTERVAL_MS")? {
            config.reap_interval = Duration::from_millis(millis);
        }
        if let Some(max) = parse_var::<u32>(&lookup, "LAONET_MAX_REPROCESSING")? {
            config.max_reprocessing = max;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "LAONET_REPROCESSING_DELAY_SECS")? {
            config.reprocessing_delay = Duration::from_secs(secs);
        }

        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> Result<(), Error> {
        if self.request_timeout == Duration::from_secs(0) {
            return Err(Error::InvalidConfig("request timeout must be positive".into()));
        }
        if self.reap_interval == Duration::from_secs(0) {
            return Err(Error::InvalidConfig("reap interval must be positive".into()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, Error> {
    match lookup(name) {
        Some(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{} is not a valid number: {}", name, val))),
        None => Ok(None),
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
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_reprocessing, 5);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("LAONET_SERVER_ADDRESS", "10.0.0.1:9100"),
            ("LAONET_REQUEST_TIMEOUT_SECS", "2"),
            ("LAONET_REAP_INTERVAL_MS", "250"),
            ("LAONET_MAX_REPROCESSING", "0"),
        ]))
        .unwrap();
        assert_eq!(config.server_address, "10.0.0.1:9100");
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.reap_interval, Duration::from_millis(250));
        assert_eq!(config.max_reprocessing, 0);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("LAONET_REQUEST_TIMEOUT_SECS", "soon")])),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("LAONET_REQUEST_TIMEOUT_SECS", "0")])),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("LAONET_SERVER_ADDRESS", " ")])),
            Err(Error::InvalidConfig(_))
        ));
    }
}
