//! Shared application state for the Axum API server.

use courier_common::config::AppConfig;
use courier_hub::Hub;
use courier_queue::{RedisTransport, StreamBroker};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub broker: StreamBroker<RedisTransport>,
    pub hub: Hub,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(broker: StreamBroker<RedisTransport>, hub: Hub, config: AppConfig) -> Self {
        Self {
            broker,
            hub,
            config,
        }
    }
}
