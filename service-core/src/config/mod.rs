use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Base settings shared by every service.
///
/// `port` is the HTTP side port; the gRPC server listens on `port + 1`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Port for the gRPC listener. A zero HTTP port (ephemeral) stays zero.
    pub fn grpc_port(&self) -> u16 {
        if self.port == 0 {
            0
        } else {
            self.port.saturating_add(1)
        }
    }
}
