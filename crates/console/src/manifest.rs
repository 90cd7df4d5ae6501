//! Job manifest: the list of operator jobs the binary runs.
//!
//! ```json
//! {
//!   "jobs": [
//!     {
//!       "operator_phone": "(11) 99999-0000",
//!       "tone": "formal",
//!       "auto_send": false,
//!       "batch": { "name": "march.xlsx", "rows": [ ... ] }
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use cobra_core::batch::DebtorBatch;
use cobra_core::job::Tone;
use serde::Deserialize;

use crate::error::{ConsoleError, ConsoleResult};

/// One operator job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    /// Phone number of the sending account, in any common notation.
    pub operator_phone: String,
    #[serde(default)]
    pub tone: Tone,
    /// Send every generated message without manual review.
    #[serde(default)]
    pub auto_send: bool,
    pub batch: DebtorBatch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobManifest {
    pub jobs: Vec<JobSpec>,
}

/// Parse a manifest from JSON text.
pub fn parse(text: &str) -> ConsoleResult<JobManifest> {
    serde_json::from_str(text).map_err(|e| ConsoleError::Manifest(e.to_string()))
}

/// Read and parse the manifest at `path`.
pub async fn load(path: &Path) -> ConsoleResult<JobManifest> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConsoleError::Manifest(format!("{}: {e}", path.display())))?;
    let manifest = parse(&text)?;
    tracing::info!(path = %path.display(), jobs = manifest.jobs.len(), "Loaded job manifest");
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_with_defaults() {
        let manifest = parse(
            r#"{
                "jobs": [{
                    "operator_phone": "11999990000",
                    "batch": {
                        "name": "march.xlsx",
                        "rows": [{
                            "client_code": "C1",
                            "name": "Ana",
                            "amount": "100,00",
                            "due_date": "10/03/2026",
                            "phone": "11988887777"
                        }]
                    }
                }]
            }"#,
        )
        .unwrap();

        let job = &manifest.jobs[0];
        assert_eq!(job.tone, Tone::Empathetic);
        assert!(!job.auto_send);
        assert_eq!(job.batch.rows.len(), 1);
    }

    #[test]
    fn explicit_tone() {
        let manifest = parse(
            r#"{"jobs":[{"operator_phone":"1","tone":"urgent","auto_send":true,
                "batch":{"name":"b","rows":[]}}]}"#,
        )
        .unwrap();
        assert_eq!(manifest.jobs[0].tone, Tone::Urgent);
        assert!(manifest.jobs[0].auto_send);
    }

    #[test]
    fn malformed_manifest() {
        assert_matches!(parse("{\"jobs\": 3}"), Err(ConsoleError::Manifest(_)));
    }

    #[tokio::test]
    async fn missing_file() {
        let err = load(Path::new("/nonexistent/jobs.json")).await.unwrap_err();
        assert_matches!(err, ConsoleError::Manifest(msg) if msg.contains("/nonexistent/jobs.json"));
    }
}
