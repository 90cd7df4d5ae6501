//! Client for the WhatsApp gateway (Evolution API).
//!
//! Used for two things: checking whether debtor numbers have a WhatsApp
//! account (the phone registry) and reading the connection state of a
//! sending account.

use std::time::Duration;

use cobra_core::dispatch::{ConnectionProbe, ConnectionState};
use cobra_core::error::CoreError;
use cobra_core::types::AccountId;
use cobra_core::validation::PhoneRegistry;
use serde::Deserialize;

use crate::error::{status_error, GatewayError};

/// Per-request timeout for gateway calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const SERVICE: &str = "whatsapp gateway";

/// One entry of the `whatsappNumbers` response.
#[derive(Debug, Clone, Deserialize)]
pub struct NumberCheck {
    #[serde(default)]
    pub exists: bool,
    #[serde(default)]
    pub number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectionStateResponse {
    instance: Option<ConnectionStateInstance>,
}

#[derive(Debug, Deserialize)]
struct ConnectionStateInstance {
    state: Option<String>,
}

/// HTTP client for one Evolution API deployment.
pub struct EvolutionApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl EvolutionApi {
    pub fn new(base_url: String, api_key: String) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client, base_url, api_key))
    }

    /// Reuse an existing [`reqwest::Client`] (shares its connection pool).
    pub fn with_client(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Ask the gateway which of `numbers` have a WhatsApp account, as seen
    /// from the `instance` session.
    pub async fn check_numbers(
        &self,
        instance: &str,
        numbers: &[&str],
    ) -> Result<Vec<NumberCheck>, GatewayError> {
        let response = self
            .client
            .post(format!("{}/chat/whatsappNumbers/{instance}", self.base_url))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({ "numbers": numbers }))
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 && status != 201 {
            return Err(status_error(SERVICE, response).await);
        }

        let body: serde_json::Value = response.json().await?;
        Ok(parse_number_checks(body))
    }

    /// Read the connection state of a sending account.
    ///
    /// Any non-200 answer means the gateway does not know the instance.
    pub async fn fetch_connection_state(
        &self,
        instance: &str,
    ) -> Result<ConnectionState, GatewayError> {
        let response = self
            .client
            .get(format!("{}/instance/connectionState/{instance}", self.base_url))
            .header("apikey", &self.api_key)
            .send()
            .await?;

        if response.status().as_u16() != 200 {
            return Ok(ConnectionState::NotFound);
        }

        let state = match response.json::<ConnectionStateResponse>().await {
            Ok(body) => body
                .instance
                .and_then(|i| i.state)
                .map(|s| ConnectionState::from_wire(&s))
                .unwrap_or(ConnectionState::Unknown),
            Err(_) => ConnectionState::Unknown,
        };
        Ok(state)
    }
}

/// Parse a `whatsappNumbers` body leniently; anything but a list of objects
/// yields no checks.
fn parse_number_checks(body: serde_json::Value) -> Vec<NumberCheck> {
    match body {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).unwrap_or(NumberCheck {
                    exists: false,
                    number: None,
                })
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl PhoneRegistry for EvolutionApi {
    async fn is_registered(&self, account: &AccountId, number: &str) -> Result<bool, CoreError> {
        let checks = self.check_numbers(account.as_str(), &[number]).await?;
        Ok(checks.first().is_some_and(|c| c.exists))
    }
}

impl ConnectionProbe for EvolutionApi {
    async fn connection_state(&self, account: &AccountId) -> Result<ConnectionState, CoreError> {
        Ok(self.fetch_connection_state(account.as_str()).await?)
    }
}
