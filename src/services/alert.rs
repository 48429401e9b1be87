//! Operator alerts for worker failures.

use crate::error::AppError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

/// Best-effort delivery of a text message to an operator channel.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), AppError>;
}

/// Posts `{"text": ...}` to a chat incoming-webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    webhook_url: Option<String>,
    client: Client,
}

impl WebhookAlertSink {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            webhook_url,
            client,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, text: &str) -> Result<(), AppError> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| AppError::alert("alert webhook URL is not configured"))?;

        let response = self
            .client
            .post(url)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| AppError::alert(format!("webhook request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::alert(format!("webhook returned {}", status)));
        }

        Ok(())
    }
}

/// Render a worker failure as a fenced code block.
pub fn format_error_alert(worker: &str, err: &AppError) -> String {
    format!("```\n{}: {}\n```", worker, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accept one request, reply with `status_line`, return the raw request.
    async fn one_shot_server(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request.ends_with(b"}") {
                    break;
                }
            }
            let response = format!("{}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn test_posts_text_payload() {
        let (url, server) = one_shot_server("HTTP/1.1 200 OK").await;
        let sink = WebhookAlertSink::new(Some(url), Duration::from_secs(5)).unwrap();

        sink.send("worker failed").await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains(r#"{"text":"worker failed"}"#));
    }

    #[tokio::test]
    async fn test_error_status_is_alert_error() {
        let (url, _server) = one_shot_server("HTTP/1.1 500 Internal Server Error").await;
        let sink = WebhookAlertSink::new(Some(url), Duration::from_secs(5)).unwrap();

        let result = sink.send("worker failed").await;
        assert!(matches!(result, Err(AppError::Alert { .. })));
    }

    #[tokio::test]
    async fn test_missing_url_is_alert_error() {
        let sink = WebhookAlertSink::new(None, Duration::from_secs(5)).unwrap();
        assert!(matches!(sink.send("x").await, Err(AppError::Alert { .. })));
    }

    #[test]
    fn test_format_error_alert() {
        let text = format_error_alert("sync repo:foo/bar", &AppError::network("Request timed out"));
        assert_eq!(
            text,
            "```\nsync repo:foo/bar: Network error: Request timed out\n```"
        );
    }
}
