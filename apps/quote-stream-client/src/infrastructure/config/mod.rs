//! Configuration Module
//!
//! Configuration loading for the quote client.

mod settings;

pub use settings::{
    AuthToken, ClientConfig, ConfigError, StreamTarget, parse_compression_list,
};
