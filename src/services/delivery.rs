//! Paced, sequential delivery of rendered messages through one gateway.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream};
use serde::Serialize;

use crate::config::settings::DeliveryConfig;
use crate::models::DeliveryResult;
use crate::services::gateway::{GatewayResponse, SmsGateway};

/// A rendered message ready for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub phone: String,
    pub name: Option<String>,
    pub body: String,
}

/// Normalized result of a single gateway request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub gateway_id: Option<String>,
    pub status: Option<String>,
    pub error: Option<String>,
    /// Rate limiting, server error or transport failure
    pub transient: bool,
}

impl SendOutcome {
    fn from_response(response: GatewayResponse) -> Self {
        let transient = response.is_transient();
        if response.accepted {
            return Self {
                success: true,
                gateway_id: response.message_id,
                status: response.status,
                error: None,
                transient,
            };
        }

        let text = response.error_text.unwrap_or_else(|| match response.http_status {
            Some(status) => format!("HTTP {}", status),
            None => "No response from gateway".to_string(),
        });
        // Classification matches numeric codes in the text.
        let error = match response.error_code {
            Some(code) if !text.contains(&code.to_string()) => {
                format!("{} (code {})", text, code)
            }
            _ => text,
        };
        Self {
            success: false,
            gateway_id: None,
            status: response.status,
            error: Some(error),
            transient,
        }
    }

    fn into_result(self, message: OutboundMessage) -> DeliveryResult {
        if self.success {
            DeliveryResult::delivered(message.phone, message.name, message.body, self.gateway_id)
        } else {
            DeliveryResult::failed(
                message.phone,
                message.name,
                message.body,
                self.error.unwrap_or_default(),
            )
        }
    }
}

/// A batch stopped early on a transient failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransientHalt {
    /// Position of the message that was not recorded
    pub index: usize,
    pub phone: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Delivered { index: usize, result: DeliveryResult },
    /// Always the last item of the stream
    Halted(TransientHalt),
}

#[derive(Clone)]
pub struct DeliveryEngine {
    gateway: Arc<dyn SmsGateway>,
    pace: Duration,
    raise_on_transient: bool,
}

impl DeliveryEngine {
    pub fn new(gateway: Arc<dyn SmsGateway>, pace: Duration, raise_on_transient: bool) -> Self {
        Self {
            gateway,
            pace,
            raise_on_transient,
        }
    }

    pub fn from_config(gateway: Arc<dyn SmsGateway>, config: &DeliveryConfig) -> Self {
        Self::new(gateway, config.pace_interval(), config.raise_on_transient)
    }

    pub fn gateway(&self) -> &Arc<dyn SmsGateway> {
        &self.gateway
    }

    /// Exactly one gateway request. Gateway errors become failed outcomes.
    pub async fn send_one(&self, phone: &str, body: &str) -> SendOutcome {
        match self.gateway.send(phone, body).await {
            Ok(response) => SendOutcome::from_response(response),
            Err(e) => {
                tracing::error!(
                    provider = self.gateway.name(),
                    phone = %phone,
                    error = %e,
                    "Gateway request failed"
                );
                SendOutcome {
                    success: false,
                    gateway_id: None,
                    status: None,
                    error: Some(e.reason()),
                    transient: false,
                }
            }
        }
    }

    /// Sends `messages` in order, waiting the pace interval between
    /// consecutive sends. Each result is yielded as soon as it is known.
    pub fn send_batch(
        &self,
        messages: Vec<OutboundMessage>,
    ) -> impl Stream<Item = BatchEvent> + Send + 'static {
        let state = BatchState {
            engine: self.clone(),
            messages: messages.into_iter(),
            index: 0,
            halted: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.halted {
                return None;
            }
            let message = state.messages.next()?;
            let index = state.index;
            state.index += 1;

            if index > 0 && !state.engine.pace.is_zero() {
                tokio::time::sleep(state.engine.pace).await;
            }

            let outcome = state.engine.send_one(&message.phone, &message.body).await;

            if !outcome.success && outcome.transient && state.engine.raise_on_transient {
                state.halted = true;
                let error = outcome.error.unwrap_or_default();
                tracing::warn!(index, phone = %message.phone, %error, "Batch halted on transient failure");
                let halt = TransientHalt {
                    index,
                    phone: message.phone,
                    error,
                };
                return Some((BatchEvent::Halted(halt), state));
            }

            if !outcome.success {
                tracing::debug!(index, phone = %message.phone, transient = outcome.transient, "Send failed");
            }
            let result = outcome.into_result(message);
            Some((BatchEvent::Delivered { index, result }, state))
        })
    }
}

struct BatchState {
    engine: DeliveryEngine,
    messages: std::vec::IntoIter<OutboundMessage>,
    index: usize,
    halted: bool,
}
