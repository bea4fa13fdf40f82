// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Configuration
//!
//! Raw connection settings as read from the environment, a JSON document or
//! built in code, and the validated [`ConnectionOptions`] the connection
//! manager runs with. Building options never fails loudly: an unusable
//! configuration yields `None` so callers can stop at startup.

use crate::errors::AmqpError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Scheme every broker URL must carry.
pub const AMQP_SCHEME: &str = "amqp";
/// Seconds between two reconnect attempts when nothing else is configured.
pub const DEFAULT_RECONNECT_TIME_IN_SECONDS: u64 = 5;
/// Lower bound of the reconnect delay.
pub const MIN_RECONNECT_TIME_IN_SECONDS: u64 = 1;

pub const ENV_URL: &str = "AMQP_URL";
pub const ENV_RECONNECT_TIME_IN_SECONDS: &str = "AMQP_RECONNECT_TIME_IN_SECONDS";
pub const ENV_KEEP_ALIVE: &str = "AMQP_KEEP_ALIVE";
pub const ENV_HEARTBEAT: &str = "AMQP_HEARTBEAT";
pub const ENV_CONNECTION_NAME: &str = "AMQP_CONNECTION_NAME";

/// One broker URL, or several in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmqpUrls {
    Single(String),
    Many(Vec<String>),
}

impl AmqpUrls {
    /// URLs in the order they should be tried.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            AmqpUrls::Single(url) => vec![url.clone()],
            AmqpUrls::Many(urls) => urls.clone(),
        }
    }
}

impl From<&str> for AmqpUrls {
    fn from(url: &str) -> Self {
        AmqpUrls::Single(url.to_owned())
    }
}

impl From<String> for AmqpUrls {
    fn from(url: String) -> Self {
        AmqpUrls::Single(url)
    }
}

impl From<Vec<&str>> for AmqpUrls {
    fn from(urls: Vec<&str>) -> Self {
        AmqpUrls::Many(urls.into_iter().map(str::to_owned).collect())
    }
}

impl From<Vec<String>> for AmqpUrls {
    fn from(urls: Vec<String>) -> Self {
        AmqpUrls::Many(urls)
    }
}

fn is_single_amqp_url_valid(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.scheme() == AMQP_SCHEME,
        Err(_) => false,
    }
}

/// Checks broker URLs.
///
/// A URL is valid when it parses and its scheme is exactly `amqp`. A list is
/// valid only when every one of its URLs is, so a single bad entry rejects the
/// whole list.
///
/// Unlike a plain "every element is valid" rule, which holds for an empty
/// list, an empty list is rejected here: it has nothing to connect to.
pub fn is_amqp_url_valid(urls: &AmqpUrls) -> bool {
    match urls {
        AmqpUrls::Single(url) => is_single_amqp_url_valid(url),
        AmqpUrls::Many(urls) => {
            !urls.is_empty() && urls.iter().all(|u| is_single_amqp_url_valid(u))
        }
    }
}

/// Socket level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketOptions {
    /// TCP keep-alive. Independent of the AMQP heartbeat.
    #[serde(default)]
    pub keep_alive: Option<bool>,
}

/// Connection settings as given by the caller. Everything is optional here;
/// [`ConnectionOptions::build`] decides whether the result is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub url: Option<AmqpUrls>,
    #[serde(default)]
    pub connection_options: Option<SocketOptions>,
    /// Delay between connection attempts. Values below one second are raised
    /// to one second.
    #[serde(default)]
    pub reconnect_time_in_seconds: Option<u64>,
    /// AMQP heartbeat in seconds. `0` disables it. When absent, a heartbeat
    /// query in the URL or the transport default applies.
    #[serde(default)]
    pub heartbeat: Option<u16>,
    /// Name reported to the broker for this connection.
    #[serde(default)]
    pub connection_name: Option<String>,
}

impl ConnectionConfig {
    /// Creates a configuration for one URL or a prioritized list of URLs.
    ///
    /// # Parameters
    /// * `url` - A URL, or URLs tried in order on every connection attempt
    ///
    /// # Returns
    /// A configuration with every other setting left to its default
    pub fn new(url: impl Into<AmqpUrls>) -> Self {
        ConnectionConfig {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Sets the TCP keep-alive flag. Defaults to `true`.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.connection_options = Some(SocketOptions {
            keep_alive: Some(keep_alive),
        });
        self
    }

    /// Sets the delay between connection attempts. Defaults to 5 seconds.
    pub fn reconnect_time_in_seconds(mut self, seconds: u64) -> Self {
        self.reconnect_time_in_seconds = Some(seconds);
        self
    }

    /// Sets the AMQP heartbeat; `0` disables it.
    pub fn heartbeat(mut self, seconds: u16) -> Self {
        self.heartbeat = Some(seconds);
        self
    }

    pub fn connection_name(mut self, name: &str) -> Self {
        self.connection_name = Some(name.to_owned());
        self
    }

    /// Reads the configuration from the process environment.
    ///
    /// `AMQP_URL` may hold a comma separated list of URLs.
    pub fn from_env() -> Result<ConnectionConfig, AmqpError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ConnectionConfig::from_env`] but reading through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<ConnectionConfig, AmqpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(ENV_URL).map(|raw| {
            let urls: Vec<String> = raw
                .split(',')
                .map(|u| u.trim().to_owned())
                .filter(|u| !u.is_empty())
                .collect();

            if urls.len() == 1 {
                AmqpUrls::Single(urls[0].clone())
            } else {
                AmqpUrls::Many(urls)
            }
        });

        let keep_alive = parse_var::<bool>(&lookup, ENV_KEEP_ALIVE)?;

        Ok(ConnectionConfig {
            url,
            connection_options: keep_alive.map(|keep_alive| SocketOptions {
                keep_alive: Some(keep_alive),
            }),
            reconnect_time_in_seconds: parse_var(&lookup, ENV_RECONNECT_TIME_IN_SECONDS)?,
            heartbeat: parse_var(&lookup, ENV_HEARTBEAT)?,
            connection_name: lookup(ENV_CONNECTION_NAME),
        })
    }

    /// Reads the configuration from a JSON document.
    pub fn from_json(raw: &str) -> Result<ConnectionConfig, AmqpError> {
        serde_json::from_str(raw).map_err(|err| {
            warn!(error = err.to_string(), "failure to parse connection config");
            AmqpError::ConfigurationError(err.to_string())
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, AmqpError>
where
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            warn!(key = key, value = %raw, "failure to parse environment variable");
            AmqpError::ConfigurationError(format!("`{key}` has an invalid value `{raw}`"))
        }),
    }
}

/// Validated connection settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub url: AmqpUrls,
    pub keep_alive: bool,
    pub reconnect_time_in_seconds: u64,
    pub heartbeat: Option<u16>,
    pub connection_name: Option<String>,
}

impl ConnectionOptions {
    /// Applies defaults to a caller configuration.
    ///
    /// Returns `None` when there is no configuration, no URL, or any URL is
    /// not an `amqp` URL. Defaults: `keep_alive = true`,
    /// `reconnect_time_in_seconds = 5`. Values set by the caller always win.
    pub fn build(config: Option<&ConnectionConfig>) -> Option<ConnectionOptions> {
        let config = config?;
        let url = config.url.as_ref()?;

        if !is_amqp_url_valid(url) {
            warn!("refusing connection config with an invalid amqp url");
            return None;
        }

        let keep_alive = config
            .connection_options
            .as_ref()
            .and_then(|o| o.keep_alive)
            .unwrap_or(true);

        Some(ConnectionOptions {
            url: url.clone(),
            keep_alive,
            reconnect_time_in_seconds: config
                .reconnect_time_in_seconds
                .unwrap_or(DEFAULT_RECONNECT_TIME_IN_SECONDS),
            heartbeat: config.heartbeat,
            connection_name: config.connection_name.clone(),
        })
    }

    /// Delay between connection attempts, never below one second.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_time_in_seconds.max(MIN_RECONNECT_TIME_IN_SECONDS))
    }
}
