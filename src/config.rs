//! Process environment and startup seed definitions.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use std::{fs, net::SocketAddr};

use serde::Deserialize;

/// Values used to build ARNs and URLs, plus broker-wide tunables.
#[derive(Debug, Clone)]
pub struct Environment {
    pub account_id: String,
    pub region: String,
    pub host: String,
    pub sqs_port: u16,
    pub sns_port: u16,
    pub deduplication: bool,
    pub dedup_window: Duration,
    pub delivery_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for Environment {
    fn default() -> Self {
        Environment {
            account_id: "000000000000".into(),
            region: "us-east-1".into(),
            host: "localhost".into(),
            sqs_port: 9324,
            sns_port: 9911,
            deduplication: true,
            dedup_window: Duration::from_secs(300),
            delivery_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_millis(1000),
        }
    }
}

impl Environment {
    pub fn sqs_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.sqs_port)
    }

    pub fn sns_base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.sns_port)
    }

    pub fn queue_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.sqs_base_url(), self.account_id, name)
    }

    pub fn queue_arn(&self, name: &str) -> String {
        format!("arn:aws:sqs:{}:{}:{}", self.region, self.account_id, name)
    }

    /// Normalises an `sqs` subscription endpoint given as a queue name, URL
    /// or ARN to the queue ARN.
    pub fn queue_arn_for_endpoint(&self, endpoint: &str) -> String {
        if endpoint.starts_with("arn:") {
            return endpoint.to_string();
        }
        let name = endpoint.trim_end_matches('/').rsplit('/').next().unwrap_or(endpoint);
        self.queue_arn(name)
    }

    pub fn topic_arn(&self, name: &str) -> String {
        format!("arn:aws:sns:{}:{}:{}", self.region, self.account_id, name)
    }

    pub fn sqs_bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("0.0.0.0:{}", self.sqs_port).parse()
    }

    pub fn sns_bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("0.0.0.0:{}", self.sns_port).parse()
    }

    pub fn apply(&mut self, overrides: &EnvironmentOverrides) {
        if let Some(ref v) = overrides.account_id {
            self.account_id = v.clone();
        }
        if let Some(ref v) = overrides.region {
            self.region = v.clone();
        }
        if let Some(ref v) = overrides.host {
            self.host = v.clone();
        }
        if let Some(v) = overrides.sqs_port {
            self.sqs_port = v;
        }
        if let Some(v) = overrides.sns_port {
            self.sns_port = v;
        }
        if let Some(v) = overrides.deduplication {
            self.deduplication = v;
        }
        if let Some(v) = overrides.dedup_window_seconds {
            self.dedup_window = Duration::from_secs(v);
        }
        if let Some(v) = overrides.delivery_timeout_seconds {
            self.delivery_timeout = Duration::from_secs(v);
        }
        if let Some(v) = overrides.sweep_interval_millis {
            self.sweep_interval = Duration::from_millis(v.max(10));
        }
    }
}

/// `[environment]` table of the config file. Anything set here wins over the
/// command line defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvironmentOverrides {
    pub account_id: Option<String>,
    pub region: Option<String>,
    pub host: Option<String>,
    pub sqs_port: Option<u16>,
    pub sns_port: Option<u16>,
    pub deduplication: Option<bool>,
    pub dedup_window_seconds: Option<u64>,
    pub delivery_timeout_seconds: Option<u64>,
    pub sweep_interval_millis: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueSeed {
    pub name: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSeed {
    pub protocol: String,
    /// Queue name, URL or ARN for `sqs`; a URL for `http`/`https`.
    pub endpoint: String,
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub filter_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicSeed {
    pub name: String,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSeed>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seeds {
    #[serde(default)]
    pub queues: Vec<QueueSeed>,
    #[serde(default)]
    pub topics: Vec<TopicSeed>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub environment: EnvironmentOverrides,
    #[serde(flatten)]
    pub seeds: Seeds,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ConfigFile, anyhow::Error> {
    let raw = fs::read_to_string(path)?;
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<ConfigFile, anyhow::Error> {
    let config: ConfigFile = toml::from_str(raw)?;
    Ok(config)
}
