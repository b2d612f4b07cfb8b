//! SMS gateways behind the [`SmsGateway`] trait.

mod log_provider;
mod provider;
mod twilio_provider;

use std::sync::Arc;

pub use log_provider::LogGateway;
pub use provider::{GatewayResponse, SmsGateway};
pub use twilio_provider::TwilioGateway;

use crate::config::settings::{GatewayConfig, GatewayProvider};
use crate::error::AppResult;

/// Builds the gateway selected by configuration.
pub fn build_gateway(config: &GatewayConfig) -> AppResult<Arc<dyn SmsGateway>> {
    Ok(match config.provider {
        GatewayProvider::Twilio => Arc::new(TwilioGateway::new(config.clone())?),
        GatewayProvider::Log => Arc::new(LogGateway::new()),
    })
}
