//! Azure Document Intelligence client (`prebuilt-read`).
//!
//! Analysis is a long-running operation: the POST answers `202 Accepted`
//! with an `Operation-Location` header, which is polled until the status is
//! `succeeded` or `failed`.

use super::{check_status, http_client, join_url, AnalyzedDocument, AnalyzedPage, DocumentAnalyzer};
use crate::config::DocumentAnalysisConfig;
use crate::error::CapabilityError;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// REST client for the document-analysis service.
pub struct AzureDocumentClient {
    http: reqwest::Client,
    config: DocumentAnalysisConfig,
    timeout_secs: u64,
}

impl AzureDocumentClient {
    pub fn new(config: DocumentAnalysisConfig, timeout_secs: u64) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: http_client(timeout_secs)?,
            config,
            timeout_secs,
        })
    }

    fn analyze_url(&self) -> String {
        let mut url = join_url(
            &self.config.endpoint,
            &format!(
                "documentintelligence/documentModels/{}:analyze?api-version={}",
                self.config.model_id, self.config.api_version
            ),
        );
        if self.config.first_page_only {
            url.push_str("&pages=1");
        }
        url
    }

    async fn poll(&self, operation_url: &str) -> Result<AnalyzeResult, CapabilityError> {
        for attempt in 1..=self.config.max_polls {
            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;

            let response = self
                .http
                .get(operation_url)
                .header(KEY_HEADER, &self.config.key)
                .send()
                .await
                .map_err(|e| CapabilityError::from_reqwest(e, self.timeout_secs))?;
            let op: AnalyzeOperation = check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| CapabilityError::MalformedResponse(e.to_string()))?;

            debug!("Analyze poll {}: status={}", attempt, op.status);
            match op.status.as_str() {
                "succeeded" => {
                    return op.analyze_result.ok_or_else(|| {
                        CapabilityError::MalformedResponse("succeeded without analyzeResult".into())
                    })
                }
                "failed" | "canceled" => {
                    let detail = op
                        .error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| op.status.clone());
                    return Err(CapabilityError::OperationFailed(detail));
                }
                _ => continue,
            }
        }
        Err(CapabilityError::OperationFailed(format!(
            "analysis still running after {} polls",
            self.config.max_polls
        )))
    }
}

#[async_trait]
impl DocumentAnalyzer for AzureDocumentClient {
    async fn analyze(
        &self,
        document: &[u8],
        content_type: &str,
    ) -> Result<AnalyzedDocument, CapabilityError> {
        info!(
            "Submitting {} bytes ({}) to {}",
            document.len(),
            content_type,
            self.config.model_id
        );

        let response = self
            .http
            .post(self.analyze_url())
            .header(KEY_HEADER, &self.config.key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| CapabilityError::from_reqwest(e, self.timeout_secs))?;
        let response = check_status(response).await?;

        let operation_url = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                CapabilityError::MalformedResponse("missing Operation-Location header".into())
            })?;

        let result = self.poll(&operation_url).await?;
        Ok(result.into())
    }
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    pages: Vec<WirePage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePage {
    #[serde(default)]
    page_number: u32,
    #[serde(default)]
    lines: Vec<WireLine>,
}

#[derive(Debug, Deserialize)]
struct WireLine {
    #[serde(default)]
    content: String,
}

impl From<AnalyzeResult> for AnalyzedDocument {
    fn from(result: AnalyzeResult) -> Self {
        let mut pages = result.pages;
        pages.sort_by_key(|p| p.page_number);
        AnalyzedDocument {
            pages: pages
                .into_iter()
                .map(|p| AnalyzedPage {
                    lines: p.lines.into_iter().map(|l| l.content).collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(first_page_only: bool) -> DocumentAnalysisConfig {
        DocumentAnalysisConfig {
            endpoint: "https://menu-ocr.cognitiveservices.azure.com/".into(),
            key: "k".into(),
            first_page_only,
            ..Default::default()
        }
    }

    #[test]
    fn analyze_url_first_page_only() {
        let client = AzureDocumentClient::new(config(true), 30).unwrap();
        assert_eq!(
            client.analyze_url(),
            "https://menu-ocr.cognitiveservices.azure.com/documentintelligence/documentModels/\
             prebuilt-read:analyze?api-version=2024-11-30&pages=1"
        );
    }

    #[test]
    fn analyze_url_all_pages() {
        let client = AzureDocumentClient::new(config(false), 30).unwrap();
        assert!(!client.analyze_url().contains("pages="));
    }

    #[test]
    fn parses_succeeded_operation_in_page_order() {
        let body = r#"{
            "status": "succeeded",
            "analyzeResult": {
                "apiVersion": "2024-11-30",
                "pages": [
                    {"pageNumber": 2, "lines": [{"content": "Desserts"}]},
                    {"pageNumber": 1, "lines": [{"content": "Burger Deluxe", "polygon": [1,2]}, {"content": "$12.99"}]}
                ]
            }
        }"#;
        let op: AnalyzeOperation = serde_json::from_str(body).unwrap();
        assert_eq!(op.status, "succeeded");
        let doc: AnalyzedDocument = op.analyze_result.unwrap().into();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0].lines, vec!["Burger Deluxe", "$12.99"]);
        assert_eq!(doc.pages[1].lines, vec!["Desserts"]);
    }

    #[test]
    fn parses_running_operation_without_result() {
        let op: AnalyzeOperation = serde_json::from_str(r#"{"status":"running"}"#).unwrap();
        assert!(op.analyze_result.is_none());
    }

    #[test]
    fn parses_page_without_lines() {
        let op: AnalyzeOperation = serde_json::from_str(
            r#"{"status":"succeeded","analyzeResult":{"pages":[{"pageNumber":1}]}}"#,
        )
        .unwrap();
        let doc: AnalyzedDocument = op.analyze_result.unwrap().into();
        assert_eq!(doc.pages, vec![AnalyzedPage::default()]);
    }
}
