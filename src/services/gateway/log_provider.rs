use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::provider::{GatewayResponse, SmsGateway};
use crate::error::AppResult;

/// Development gateway that accepts every message and only logs it.
#[derive(Debug, Default)]
pub struct LogGateway {
    sent: AtomicU64,
}

impl LogGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SmsGateway for LogGateway {
    async fn send(&self, to: &str, body: &str) -> AppResult<GatewayResponse> {
        let seq = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(phone = %to, chars = body.chars().count(), seq, "SMS accepted by log gateway");
        Ok(GatewayResponse::accepted(format!("LOG{:08}", seq), "logged", 200))
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
