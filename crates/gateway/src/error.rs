use cobra_core::error::CoreError;

/// Errors from the HTTP gateway layer.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote service returned a status it does not accept.
    #[error("{service} returned HTTP {status}: {body}")]
    HttpStatus {
        service: &'static str,
        status: u16,
        /// Response body, shortened for logs.
        body: String,
    },

    /// A configured base URL cannot carry path segments.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<GatewayError> for CoreError {
    fn from(err: GatewayError) -> Self {
        CoreError::Transport(err.to_string())
    }
}

/// Maximum number of body characters kept in [`GatewayError::HttpStatus`].
pub(crate) const ERROR_BODY_CHARS: usize = 500;

/// Turn a rejected response into a [`GatewayError::HttpStatus`].
pub(crate) async fn status_error(service: &'static str, response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    GatewayError::HttpStatus {
        service,
        status,
        body: body.chars().take(ERROR_BODY_CHARS).collect(),
    }
}
