// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::gateway_core::constants::config as keys;
use crate::gateway_core::errors::GatewayError;
use crate::mcp::router::RouterSettings;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind_address: String,
    pub adapters_file: Option<PathBuf>,
    pub log_level: String,
    pub log_format: String, // "json" or "text"
    pub dispatch_timeout_secs: u64,
    pub session_idle_timeout_secs: u64,
    pub session_idle_after_secs: u64,
    pub sweep_interval_secs: u64,
    pub cache_max_entries: u64,
    pub cache_ttl_secs: u64,
    pub monitor_capacity: usize,
    pub body_limit_bytes: usize,
    pub service_url_template: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, GatewayError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| GatewayError::Configuration(format!("{key} has invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, GatewayError> {
        let defaults = Self::default();
        let config = Self {
            bind_address: env::var(keys::ENV_BIND_ADDRESS).unwrap_or(defaults.bind_address),
            adapters_file: env::var(keys::ENV_ADAPTERS_FILE).ok().map(PathBuf::from),
            log_level: env::var(keys::ENV_LOG_LEVEL).unwrap_or(defaults.log_level),
            log_format: env::var(keys::ENV_LOG_FORMAT).unwrap_or(defaults.log_format),
            dispatch_timeout_secs: env_or(keys::ENV_DISPATCH_TIMEOUT_SECS, defaults.dispatch_timeout_secs)?,
            session_idle_timeout_secs: env_or(
                keys::ENV_SESSION_IDLE_TIMEOUT_SECS,
                defaults.session_idle_timeout_secs,
            )?,
            session_idle_after_secs: env_or(keys::ENV_SESSION_IDLE_AFTER_SECS, defaults.session_idle_after_secs)?,
            sweep_interval_secs: env_or(keys::ENV_SWEEP_INTERVAL_SECS, defaults.sweep_interval_secs)?,
            cache_max_entries: env_or(keys::ENV_CACHE_MAX_ENTRIES, defaults.cache_max_entries)?,
            cache_ttl_secs: env_or(keys::ENV_CACHE_TTL_SECS, defaults.cache_ttl_secs)?,
            monitor_capacity: env_or(keys::ENV_MONITOR_CAPACITY, defaults.monitor_capacity)?,
            body_limit_bytes: env_or(keys::ENV_BODY_LIMIT_BYTES, defaults.body_limit_bytes)?,
            service_url_template: env::var(keys::ENV_SERVICE_URL_TEMPLATE)
                .unwrap_or(defaults.service_url_template),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        let positive = [
            (keys::ENV_DISPATCH_TIMEOUT_SECS, self.dispatch_timeout_secs),
            (keys::ENV_SESSION_IDLE_TIMEOUT_SECS, self.session_idle_timeout_secs),
            (keys::ENV_SWEEP_INTERVAL_SECS, self.sweep_interval_secs),
            (keys::ENV_CACHE_MAX_ENTRIES, self.cache_max_entries),
            (keys::ENV_MONITOR_CAPACITY, self.monitor_capacity as u64),
            (keys::ENV_BODY_LIMIT_BYTES, self.body_limit_bytes as u64),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(GatewayError::Configuration(format!("{key} must be greater than zero")));
        }
        if self.session_idle_after_secs > self.session_idle_timeout_secs {
            return Err(GatewayError::Configuration(format!(
                "{} must not exceed {}",
                keys::ENV_SESSION_IDLE_AFTER_SECS,
                keys::ENV_SESSION_IDLE_TIMEOUT_SECS
            )));
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(GatewayError::Configuration(format!(
                "{} must be 'text' or 'json'",
                keys::ENV_LOG_FORMAT
            )));
        }
        if !self.service_url_template.contains("{name}") {
            return Err(GatewayError::Configuration(format!(
                "{} must contain {{name}}",
                keys::ENV_SERVICE_URL_TEMPLATE
            )));
        }
        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn session_idle_after(&self) -> Duration {
        Duration::from_secs(self.session_idle_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            dispatch_timeout: self.dispatch_timeout(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_max_entries: self.cache_max_entries,
            monitor_capacity: self.monitor_capacity,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: keys::DEFAULT_BIND_ADDRESS.to_string(),
            adapters_file: None,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            dispatch_timeout_secs: 30,
            session_idle_timeout_secs: 1800,
            session_idle_after_secs: 60,
            sweep_interval_secs: 30,
            cache_max_entries: 1000,
            cache_ttl_secs: 300,
            monitor_capacity: 1000,
            body_limit_bytes: 4 * 1024 * 1024,
            service_url_template: keys::DEFAULT_SERVICE_URL_TEMPLATE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.router_settings().dispatch_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_zero_and_bad_format() {
        let config = Config {
            dispatch_timeout_secs: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(GatewayError::Configuration(_))));

        let config = Config {
            log_format: "xml".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            session_idle_after_secs: 5000,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        env::set_var("UNIPROXY_TEST_ENV_OR", "not-a-number");
        assert!(env_or::<u64>("UNIPROXY_TEST_ENV_OR", 1).is_err());
        env::remove_var("UNIPROXY_TEST_ENV_OR");
        assert_eq!(env_or::<u64>("UNIPROXY_TEST_ENV_OR", 7).unwrap(), 7);
    }
}
