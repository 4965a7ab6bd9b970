use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::RankingSource;

/// Connection settings for the ranking endpoint.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub endpoint: String,
    pub application_id: String,
    pub hits: u32,
    /// `None` requests the daily ranking; `Some("realtime")` etc. selects another period.
    pub period: Option<String>,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// Total attempts per genre, including the first.
    pub retry_attempts: u32,
    pub retry_wait: Duration,
}

/// Result of one genre fetch that the collector loop branches on.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Ranked(Value),
    /// The source rejected the genre itself (400/404); retrying will not help.
    InvalidGenre { status: u16, body: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("genre {genre_id}: gave up after {attempts} attempt(s) (status={status:?}): {detail}")]
    Transient {
        genre_id: i64,
        status: Option<u16>,
        detail: String,
        attempts: u32,
    },
    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Success,
    InvalidGenre,
    Retryable,
}

fn classify(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        400 | 404 => StatusClass::InvalidGenre,
        _ => StatusClass::Retryable,
    }
}

fn truncate_for_log(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// HTTP client for the per-genre ranking endpoint.
#[derive(Debug, Clone)]
pub struct RankingClient {
    http: Client,
    cfg: SourceConfig,
}

impl RankingClient {
    pub fn new(cfg: SourceConfig) -> Result<Self, FetchError> {
        let http = Client::builder()
            .user_agent(concat!("rank-collector/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(cfg.connect_timeout)
            .timeout(cfg.timeout)
            .build()?;
        Ok(Self { http, cfg })
    }

    fn query_for(&self, genre_id: i64) -> Vec<(&'static str, String)> {
        let mut qs = vec![
            ("applicationId", self.cfg.application_id.clone()),
            ("genreId", genre_id.to_string()),
            ("hits", self.cfg.hits.to_string()),
            ("page", "1".to_string()),
            ("format", "json".to_string()),
        ];
        if let Some(period) = self.cfg.period.as_deref().filter(|p| !p.is_empty()) {
            qs.push(("period", period.to_string()));
        }
        qs
    }

    pub async fn fetch_genre(&self, genre_id: i64) -> Result<FetchOutcome, FetchError> {
        let params = self.query_for(genre_id);
        let max_attempts = self.cfg.retry_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let t0 = Instant::now();
            let (status, detail) = match self
                .http
                .get(&self.cfg.endpoint)
                .query(&params)
                .send()
                .await
            {
                Err(e) => (None, format!("network: {e}")),
                Ok(resp) => {
                    let code = resp.status().as_u16();
                    let class = classify(code);
                    let body = resp.text().await;
                    if class == StatusClass::InvalidGenre {
                        let body = body.unwrap_or_else(|e| {
                            debug!(genre_id, status = code, error = %e, "rejected genre body unreadable");
                            String::new()
                        });
                        debug!(genre_id, status = code, body = %truncate_for_log(&body, 200), "genre rejected by source");
                        return Ok(FetchOutcome::InvalidGenre { status: code, body });
                    }
                    match body {
                        Err(e) => (Some(code), format!("body read: {e}")),
                        Ok(body) => {
                            info!(genre_id, attempt, status = code, body_len = body.len(), elapsed_ms = %t0.elapsed().as_millis(), "ranking response");
                            if class == StatusClass::Success {
                                match serde_json::from_str::<Value>(&body) {
                                    Ok(v) if v.is_object() || v.is_array() => {
                                        return Ok(FetchOutcome::Ranked(v));
                                    }
                                    Ok(_) => (Some(code), "json body is not a document".to_string()),
                                    Err(e) => (Some(code), format!("json: {e}")),
                                }
                            } else {
                                (Some(code), format!("http {code}: {}", truncate_for_log(&body, 300)))
                            }
                        }
                    }
                }
            };

            warn!(genre_id, attempt, max_attempts, status = ?status, %detail, "ranking fetch failed");
            if attempt >= max_attempts {
                return Err(FetchError::Transient {
                    genre_id,
                    status,
                    detail,
                    attempts: attempt,
                });
            }
            tokio::time::sleep(self.cfg.retry_wait).await;
        }
    }
}

#[async_trait]
impl RankingSource for RankingClient {
    async fn fetch(&self, genre_id: i64) -> Result<FetchOutcome, FetchError> {
        self.fetch_genre(genre_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves the scripted `(status, body)` responses in order, one per connection,
    /// and records each request line.
    async fn scripted_server(script: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_task = seen.clone();
        tokio::spawn(async move {
            for (status, body) in script {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = sock.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let request = String::from_utf8_lossy(&buf);
                let line = request.lines().next().unwrap_or_default().to_string();
                seen_task.lock().unwrap().push(line);
                let resp = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                sock.write_all(resp.as_bytes()).await.unwrap();
                sock.shutdown().await.ok();
            }
        });
        (format!("http://{addr}/ranking"), seen)
    }

    fn config(endpoint: String) -> SourceConfig {
        SourceConfig {
            endpoint,
            application_id: "app-1".into(),
            hits: 30,
            period: None,
            connect_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            retry_attempts: 3,
            retry_wait: Duration::from_millis(1),
        }
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(classify(200), StatusClass::Success);
        assert_eq!(classify(204), StatusClass::Success);
        assert_eq!(classify(400), StatusClass::InvalidGenre);
        assert_eq!(classify(404), StatusClass::InvalidGenre);
        assert_eq!(classify(429), StatusClass::Retryable);
        assert_eq!(classify(403), StatusClass::Retryable);
        assert_eq!(classify(503), StatusClass::Retryable);
    }

    #[tokio::test]
    async fn success_returns_document_and_sends_required_params() {
        let (url, seen) = scripted_server(vec![(200, r#"{"Items":[]}"#)]).await;
        let client = RankingClient::new(config(url)).unwrap();

        let outcome = client.fetch(100).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Ranked(serde_json::json!({ "Items": [] })));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with(
            "GET /ranking?applicationId=app-1&genreId=100&hits=30&page=1&format=json "
        ));
        assert!(!seen[0].contains("period="));
    }

    #[tokio::test]
    async fn period_is_sent_only_when_configured() {
        let (url, seen) = scripted_server(vec![(200, r#"{"Items":[]}"#)]).await;
        let mut cfg = config(url);
        cfg.period = Some("realtime".into());
        let client = RankingClient::new(cfg).unwrap();

        client.fetch(7).await.unwrap();
        assert!(seen.lock().unwrap()[0].contains("&period=realtime"));
    }

    #[tokio::test]
    async fn not_found_is_invalid_genre_without_retry() {
        let (url, seen) = scripted_server(vec![(404, r#"{"error":"not_found"}"#)]).await;
        let client = RankingClient::new(config(url)).unwrap();

        let outcome = client.fetch(5).await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::InvalidGenre {
                status: 404,
                body: r#"{"error":"not_found"}"#.into()
            }
        );
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn truncated_not_found_body_is_still_invalid_genre() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(Mutex::new(0usize));
        let accepted_task = accepted.clone();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                *accepted_task.lock().unwrap() += 1;
                let mut chunk = [0u8; 1024];
                let _ = sock.read(&mut chunk).await;
                // Promises 100 bytes, sends 5, then closes.
                let resp = "HTTP/1.1 404 Not Found\r\nContent-Length: 100\r\nConnection: close\r\n\r\n{\"err";
                sock.write_all(resp.as_bytes()).await.ok();
                sock.shutdown().await.ok();
            }
        });
        let client = RankingClient::new(config(format!("http://{addr}/ranking"))).unwrap();

        match client.fetch(5).await.unwrap() {
            FetchOutcome::InvalidGenre { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(*accepted.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_success() {
        let (url, seen) = scripted_server(vec![
            (500, "oops"),
            (429, "slow down"),
            (200, r#"{"Items":[{"Item":{"itemCode":"x"}}]}"#),
        ])
        .await;
        let client = RankingClient::new(config(url)).unwrap();

        let outcome = client.fetch(9).await.unwrap();
        assert!(matches!(outcome, FetchOutcome::Ranked(_)));
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unparseable_body_is_retried() {
        let (url, seen) =
            scripted_server(vec![(200, "<html>maintenance</html>"), (200, r#"{"Items":[]}"#)]).await;
        let client = RankingClient::new(config(url)).unwrap();

        assert!(matches!(client.fetch(9).await.unwrap(), FetchOutcome::Ranked(_)));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_report_transient_failure() {
        let (url, seen) =
            scripted_server(vec![(503, "down"), (503, "down"), (503, "down")]).await;
        let client = RankingClient::new(config(url)).unwrap();

        let err = client.fetch(30).await.unwrap_err();
        match err {
            FetchError::Transient {
                genre_id,
                status,
                attempts,
                ..
            } => {
                assert_eq!(genre_id, 30);
                assert_eq!(status, Some(503));
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn connection_errors_are_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let mut cfg = config(format!("http://{addr}/ranking"));
        cfg.retry_attempts = 2;
        let client = RankingClient::new(cfg).unwrap();

        match client.fetch(1).await.unwrap_err() {
            FetchError::Transient { status, attempts, .. } => {
                assert_eq!(status, None);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
