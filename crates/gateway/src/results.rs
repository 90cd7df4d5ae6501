//! Client for the sheet-backed result store.
//!
//! Each account owns one sheet. Before a job is dispatched its debtor rows
//! are written there; the generator then fills in the message column and
//! the poller reads the sheet back until every expected message exists.

use std::time::Duration;

use cobra_core::batch::DebtorRow;
use cobra_core::dispatch::{
    truncate_chars, ResultLocation, ResultStore, MAX_CLIENT_CODE_CHARS, MAX_MESSAGE_CHARS,
    MAX_NAME_CHARS, MAX_PHONE_CHARS,
};
use cobra_core::error::CoreError;
use cobra_core::job::GeneratedMessage;
use serde_json::{Map, Value};

use crate::error::{status_error, GatewayError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SERVICE: &str = "result store";

const NAME_ALIASES: &[&str] = &["nome", "name", "cliente_nome"];
const PHONE_ALIASES: &[&str] = &["telefone", "tel", "fone", "whatsapp", "numero", "phone", "whats"];
const MESSAGE_ALIASES: &[&str] = &["mensagem gerada", "mensagem", "message", "msg", "texto"];
const CLIENT_CODE_ALIASES: &[&str] = &[
    "cliente",
    "codigo",
    "codigo_cliente",
    "id_cliente",
    "código",
    "cod_cliente",
];

/// Status written into every freshly staged row.
pub const STATUS_PENDING: &str = "Pendente";

/// HTTP client for the result store service.
pub struct ResultStoreApi {
    client: reqwest::Client,
    base_url: reqwest::Url,
}

impl ResultStoreApi {
    pub fn new(base_url: &str) -> Result<Self, GatewayError> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| GatewayError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, base_url })
    }

    /// `{base}/sheets/{location}` with the location percent-encoded.
    fn sheet_url(&self, location: &ResultLocation) -> Result<reqwest::Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("sheets")
            .push(location.as_str());
        Ok(url)
    }

    /// Replace the sheet contents with `rows`.
    pub async fn put_rows(
        &self,
        location: &ResultLocation,
        rows: &[DebtorRow],
    ) -> Result<(), GatewayError> {
        let body: Vec<Value> = rows.iter().map(staged_row).collect();
        let response = self
            .client
            .put(self.sheet_url(location)?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }
        Ok(())
    }

    /// Read every row of the sheet. A missing sheet reads as empty.
    pub async fn get_rows(&self, location: &ResultLocation) -> Result<Vec<Value>, GatewayError> {
        let response = self.client.get(self.sheet_url(location)?).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(status_error(SERVICE, response).await);
        }

        match response.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }
}

fn staged_row(row: &DebtorRow) -> Value {
    serde_json::json!({
        "Cliente": row.client_code,
        "Nome": row.name,
        "Valor": row.amount,
        "Vencimento": row.due_date,
        "Telefone": row.phone,
        "Mensagem Gerada": "",
        "Status Envio WA": STATUS_PENDING,
    })
}

/// Render a cell as text; numbers lose nothing, null becomes empty.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn lookup(row: &Map<String, Value>, aliases: &[&str]) -> String {
    for alias in aliases {
        let hit = row
            .iter()
            .find(|(key, _)| key.trim().to_lowercase() == *alias)
            .map(|(_, v)| cell_text(v));
        if let Some(text) = hit {
            if !text.is_empty() {
                return text;
            }
        }
    }
    String::new()
}

fn is_blank_message(text: &str) -> bool {
    let lowered = text.to_lowercase();
    text.is_empty() || lowered == "nan" || lowered == "none"
}

/// Convert raw sheet rows into generated messages.
///
/// Columns are matched case-insensitively against a list of aliases per
/// field. Rows whose message is empty (or the literal `nan`/`none`) are not
/// results yet and are skipped.
pub fn parse_result_rows(rows: &[Value]) -> Vec<GeneratedMessage> {
    rows.iter()
        .filter_map(Value::as_object)
        .filter_map(|row| {
            let message = lookup(row, MESSAGE_ALIASES);
            if is_blank_message(&message) {
                return None;
            }
            Some(GeneratedMessage {
                recipient_name: truncate_chars(&lookup(row, NAME_ALIASES), MAX_NAME_CHARS),
                recipient_phone: truncate_chars(&lookup(row, PHONE_ALIASES), MAX_PHONE_CHARS),
                message_text: truncate_chars(&message, MAX_MESSAGE_CHARS),
                client_code: truncate_chars(&lookup(row, CLIENT_CODE_ALIASES), MAX_CLIENT_CODE_CHARS),
            })
        })
        .collect()
}

impl ResultStore for ResultStoreApi {
    async fn stage_rows(&self, location: &ResultLocation, rows: &[DebtorRow]) -> Result<(), CoreError> {
        self.put_rows(location, rows).await?;
        tracing::info!(location = %location, rows = rows.len(), "Staged batch rows");
        Ok(())
    }

    async fn fetch_results(&self, location: &ResultLocation) -> Result<Vec<GeneratedMessage>, CoreError> {
        let rows = self.get_rows(location).await?;
        Ok(parse_result_rows(&rows))
    }
}
