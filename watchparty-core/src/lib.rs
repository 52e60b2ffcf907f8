pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod models;
pub mod service;
pub mod session;
pub mod signaling;

#[cfg(test)]
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};
