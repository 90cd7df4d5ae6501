//! Client for the automation backend webhooks.
//!
//! Two endpoints: one starts message generation for a staged batch, the
//! other hands approved messages over for delivery. Both authenticate with
//! a shared secret header.

use std::time::Duration;

use cobra_core::dispatch::{
    DeliveryDispatcher, DeliveryRequest, GenerationAccepted, GenerationRequest, JobDispatcher,
};
use cobra_core::error::CoreError;
use serde::Serialize;
use serde_json::Value;

use crate::error::{status_error, GatewayError};

/// Header carrying the shared automation secret.
pub const SECRET_HEADER: &str = "X-Chave-Secreta";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);
const SEND_TIMEOUT: Duration = Duration::from_secs(240);

const SERVICE: &str = "automation backend";

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GeneratePayload<'a> {
    tom_mensagem: &'a str,
    total_clientes: usize,
    data_execucao: String,
    data_hoje: String,
    aba_google_sheets: &'a str,
    remetente: &'a str,
}

impl<'a> GeneratePayload<'a> {
    fn from_request(req: &'a GenerationRequest) -> Self {
        Self {
            tom_mensagem: req.tone.as_wire(),
            total_clientes: req.total_targets,
            data_execucao: req.dispatched_at.to_rfc3339(),
            data_hoje: req.dispatched_at.format("%d/%m/%Y").to_string(),
            aba_google_sheets: req.result_location.as_str(),
            remetente: req.sender.as_str(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SendItem<'a> {
    destinatario: &'a str,
    mensagem: &'a str,
    codigo_cliente: &'a str,
    nome: &'a str,
}

#[derive(Debug, Serialize)]
struct SendPayload<'a> {
    remetente: &'a str,
    itens: Vec<SendItem<'a>>,
    intervalo_segundos: u64,
}

impl<'a> SendPayload<'a> {
    fn from_request(req: &'a DeliveryRequest) -> Self {
        Self {
            remetente: req.sender.as_str(),
            itens: req
                .items
                .iter()
                .map(|i| SendItem {
                    destinatario: &i.recipient,
                    mensagem: &i.message,
                    codigo_cliente: &i.client_code,
                    nome: &i.name,
                })
                .collect(),
            intervalo_segundos: req.interval_seconds,
        }
    }
}

/// Read the expected result count from a generate response.
///
/// The backend answers with either an object or a one-element list holding
/// that object. A missing or non-numeric `total_mensagens_previstas` falls
/// back to `fallback`.
pub fn parse_expected_count(body: &Value, fallback: usize) -> usize {
    let object = match body {
        Value::Array(items) => items.first(),
        other => Some(other),
    };

    object
        .and_then(|o| o.get("total_mensagens_previstas"))
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
        .unwrap_or(fallback)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the generate and send webhooks.
pub struct AutomationApi {
    client: reqwest::Client,
    generate_url: String,
    send_url: String,
    secret: String,
}

impl AutomationApi {
    pub fn new(generate_url: String, send_url: String, secret: String) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            generate_url,
            send_url,
            secret,
        })
    }

    /// Start generation. Returns the raw response body.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Value, GatewayError> {
        let response = self
            .client
            .post(&self.generate_url)
            .header(SECRET_HEADER, &self.secret)
            .timeout(GENERATE_TIMEOUT)
            .json(&GeneratePayload::from_request(request))
            .send()
            .await?;

        if response.status().as_u16() != 200 {
            return Err(status_error(SERVICE, response).await);
        }

        // An unparseable body is still an accepted job.
        Ok(response.json::<Value>().await.unwrap_or(Value::Null))
    }

    /// Hand approved messages to the delivery workflow.
    pub async fn send(&self, request: &DeliveryRequest) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(&self.send_url)
            .header(SECRET_HEADER, &self.secret)
            .timeout(SEND_TIMEOUT)
            .json(&SendPayload::from_request(request))
            .send()
            .await?;

        if response.status().as_u16() != 200 {
            return Err(status_error(SERVICE, response).await);
        }
        Ok(())
    }
}

impl JobDispatcher for AutomationApi {
    async fn dispatch(&self, request: &GenerationRequest) -> Result<GenerationAccepted, CoreError> {
        let body = self.generate(request).await?;
        let expected_result_count = parse_expected_count(&body, request.total_targets);
        tracing::info!(
            sender = %request.sender,
            location = %request.result_location,
            expected_result_count,
            "Generation job accepted",
        );
        Ok(GenerationAccepted {
            expected_result_count,
        })
    }
}

impl DeliveryDispatcher for AutomationApi {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<(), CoreError> {
        self.send(request).await?;
        tracing::info!(sender = %request.sender, items = request.items.len(), "Delivery accepted");
        Ok(())
    }
}
