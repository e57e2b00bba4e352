//! Configuration loading, the host server list, and service wiring.

pub mod bootstrap;
pub mod config;
pub mod servers;

pub use bootstrap::Services;
pub use config::Config;
