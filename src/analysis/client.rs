use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

use super::{AnalysisError, AnalysisRequest, AnalysisResponse, AnalysisResult, AnalysisService};

/// Error bodies are cut to this many characters before they end up in logs
/// and error messages.
const MAX_ERROR_BODY: usize = 500;

/// `reqwest` client for the analysis service.
///
/// The timeout covers the whole exchange, connection through body, and is
/// fixed when the client is built.
#[derive(Clone)]
pub struct HttpAnalysisClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpAnalysisClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AnalysisError::Transport)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn classify(&self, err: reqwest::Error) -> AnalysisError {
        if err.is_timeout() {
            AnalysisError::Timeout(self.timeout)
        } else {
            AnalysisError::Transport(err)
        }
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        info!(
            submission_id = %request.submission_id,
            corpus_size = request.corpus.len(),
            text_len = request.text.len(),
            "Requesting analysis"
        );

        let response = self
            .client
            .post(self.url("/evaluate"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            warn!(
                submission_id = %request.submission_id,
                status = status.as_u16(),
                "Analysis service rejected request"
            );
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let parsed: AnalysisResponse =
            serde_json::from_str(&text).map_err(|e| AnalysisError::Decode(e.to_string()))?;

        Ok(parsed.normalize())
    }

    async fn health(&self) -> Result<(), AnalysisError> {
        let response = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AnalysisError::Status {
                status: status.as_u16(),
                body: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slash_from_base_url() {
        let client =
            HttpAnalysisClient::new("http://analysis.local:8000/", Duration::from_secs(30)).unwrap();
        assert_eq!(client.url("/evaluate"), "http://analysis.local:8000/evaluate");
        assert_eq!(client.timeout, Duration::from_secs(30));
    }
}
