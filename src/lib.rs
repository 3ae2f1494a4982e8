//! In-memory SQS and SNS emulator.
//!
//! * `sqs` – queue registry, message store and the JSON-1.0 adapter
//! * `sns` – topic registry, filter evaluation, fan-out and the query/XML adapter
//! * `broker` – owns both registries, seeding, reset and the background sweeper
//! * `config` – environment and TOML seed definitions

pub mod batch;
pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod sns;
pub mod sqs;

pub use broker::{Broker, BrokerError};
pub use config::{load_config, Environment, Seeds};
pub use error::ErrorKind;
