//! Twilio Messages REST API gateway.

use async_trait::async_trait;
use reqwest::Request;
use serde::Deserialize;

use super::provider::{GatewayResponse, SmsGateway};
use crate::config::settings::GatewayConfig;
use crate::error::{AppError, AppResult};

const PROVIDER: &str = "twilio";

#[derive(Debug, Deserialize)]
struct MessageCreated {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

/// Sends through `POST /2010-04-01/Accounts/{sid}/Messages.json`.
pub struct TwilioGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl TwilioGateway {
    pub fn new(config: GatewayConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.request_timeout())
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| AppError::Gateway {
                provider: PROVIDER.to_string(),
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.account_sid
        )
    }

    /// Form-encoded `POST` with basic auth for one message.
    fn message_request(&self, to: &str, body: &str) -> reqwest::Result<Request> {
        self.client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to),
                ("From", self.config.from_number.as_str()),
                ("Body", body),
            ])
            .build()
    }

    /// The gateway's message, or the HTTP status when it sent none. The
    /// numeric code travels separately in the response.
    fn error_text(status: u16, error: &ApiError) -> String {
        error
            .message
            .clone()
            .unwrap_or_else(|| format!("HTTP {}", status))
    }
}

#[async_trait]
impl SmsGateway for TwilioGateway {
    async fn send(&self, to: &str, body: &str) -> AppResult<GatewayResponse> {
        let request = self
            .message_request(to, body)
            .map_err(|e| AppError::Gateway {
                provider: PROVIDER.to_string(),
                message: format!("Failed to build request: {}", e),
            })?;

        let response = self.client.execute(request).await;

        let response = match response {
            Ok(response) => response,
            Err(e) => return Ok(GatewayResponse::transport_failure(e.to_string())),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return Ok(GatewayResponse::transport_failure(e.to_string())),
        };

        if status.is_success() {
            return match serde_json::from_str::<MessageCreated>(&text) {
                Ok(created) => Ok(GatewayResponse::accepted(
                    created.sid,
                    created.status.unwrap_or_else(|| "queued".to_string()),
                    status.as_u16(),
                )),
                Err(e) => Ok(GatewayResponse::rejected(
                    status.as_u16(),
                    None,
                    format!("Unreadable gateway response: {}", e),
                )),
            };
        }

        let error: ApiError = serde_json::from_str(&text).unwrap_or_default();
        Ok(GatewayResponse::rejected(
            status.as_u16(),
            error.code,
            Self::error_text(status.as_u16(), &error),
        ))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn validate_config(&self) -> AppResult<()> {
        let missing = self.config.missing_credentials();
        if !missing.is_empty() {
            return Err(AppError::validation(
                "gateway",
                format!("Missing gateway credentials: {}", missing.join(", ")),
            ));
        }
        Ok(())
    }
}
