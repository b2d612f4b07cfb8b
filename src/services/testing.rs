//! Test doubles and fixtures shared by the service and job tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jiff::Timestamp;
use tokio::time::Instant;

use crate::config::settings::DeliveryConfig;
use crate::error::{AppError, AppResult};
use crate::repositories::{MemoryStore, Repositories};
use crate::services::gateway::{GatewayResponse, SmsGateway};

#[derive(Default)]
struct GatewayLog {
    scripted: HashMap<String, GatewayResponse>,
    sent: Vec<(String, String, Instant)>,
}

/// Accepts every message unless a response is scripted for the phone.
#[derive(Default)]
pub struct ScriptedGateway {
    log: Mutex<GatewayLog>,
    missing_config: Option<String>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway whose configuration check fails.
    pub fn misconfigured(reason: &str) -> Self {
        Self {
            missing_config: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn script(&self, phone: &str, response: GatewayResponse) {
        self.log
            .lock()
            .unwrap()
            .scripted
            .insert(phone.to_string(), response);
    }

    pub fn sent_phones(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(phone, _, _)| phone.clone())
            .collect()
    }

    pub fn sent_bodies(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|(_, body, _)| body.clone())
            .collect()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.log.lock().unwrap().sent.iter().map(|(_, _, at)| *at).collect()
    }
}

#[async_trait]
impl SmsGateway for ScriptedGateway {
    async fn send(&self, to: &str, body: &str) -> AppResult<GatewayResponse> {
        let mut log = self.log.lock().unwrap();
        log.sent.push((to.to_string(), body.to_string(), Instant::now()));
        let seq = log.sent.len();
        Ok(log
            .scripted
            .get(to)
            .cloned()
            .unwrap_or_else(|| GatewayResponse::accepted(format!("SM{:04}", seq), "queued", 201)))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn validate_config(&self) -> AppResult<()> {
        match &self.missing_config {
            Some(reason) => Err(AppError::validation("gateway", reason.clone())),
            None => Ok(()),
        }
    }
}

/// A fixed instant for deterministic tests.
pub fn ts(seconds: i64) -> Timestamp {
    Timestamp::from_second(1_767_225_600 + seconds).unwrap()
}

pub fn delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        pace_interval_ms: 0,
        test_phone: Some("+15559990000".to_string()),
        ..DeliveryConfig::default()
    }
}

pub fn memory_repositories() -> (Arc<MemoryStore>, Repositories) {
    let store = Arc::new(MemoryStore::new());
    let repos = Repositories::in_memory(store.clone());
    (store, repos)
}
