//! OpenAI-compatible client against a local HTTP stub.
//!
//! Each failure mode must surface as its own error variant.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use vcr_agent_core::{
    ChatRequest, LlmConfig, ModelClient, OpenAiCompatClient, PipelineError, FALLBACK_MODEL,
};

type Handler = Arc<dyn Fn(&str, &str) -> (u16, String) + Send + Sync>;

/// One-request-per-connection HTTP stub.
struct Stub {
    endpoint: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Stub {
    async fn start<F>(delay: Duration, handler: F) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    let _ = respond(stream, delay, handler, seen).await;
                });
            }
        });

        Self {
            endpoint: format!("http://{addr}/v1"),
            requests,
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    fn client(&self, configure: impl FnOnce(LlmConfig) -> LlmConfig) -> OpenAiCompatClient {
        let config = configure(LlmConfig::default().with_endpoint(&self.endpoint));
        OpenAiCompatClient::new(config).unwrap()
    }
}

async fn respond(
    mut stream: TcpStream,
    delay: Duration,
    handler: Handler,
    seen: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let request = String::from_utf8_lossy(&buf).to_string();
    seen.lock().unwrap().push(request);

    let request_line = head.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    tokio::time::sleep(delay).await;
    let (status, body) = handler(&method, &path);
    let response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn chat_ok(content: &str) -> String {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
    .to_string()
}

fn request() -> ChatRequest {
    ChatRequest::new("local-model", "system", "draw a circle")
}

#[tokio::test]
async fn test_completion_returns_first_choice() {
    let stub = Stub::start(Duration::ZERO, |_, _| (200, chat_ok("version: 1"))).await;
    let client = stub.client(|c| c);

    let text = client
        .complete(&request(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(text, "version: 1");

    let raw = &stub.requests()[0];
    assert!(raw.starts_with("POST /v1/chat/completions"));
    assert!(raw.contains("\"temperature\":0.0"));
    assert!(!raw.to_ascii_lowercase().contains("authorization:"));
}

#[tokio::test]
async fn test_api_key_sent_as_bearer() {
    let stub = Stub::start(Duration::ZERO, |_, _| (200, chat_ok("ok"))).await;
    let client = stub.client(|c| LlmConfig {
        api_key: Some("sk-test".to_string()),
        ..c
    });

    client.complete(&request(), Duration::from_secs(5)).await.unwrap();
    let raw = stub.requests()[0].to_ascii_lowercase();
    assert!(raw.contains("authorization: bearer sk-test"));
}

#[tokio::test]
async fn test_connection_refused_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = LlmConfig::default().with_endpoint(&format!("http://{addr}/v1"));
    let client = OpenAiCompatClient::new(config).unwrap();
    let err = client
        .complete(&request(), Duration::from_secs(5))
        .await
        .unwrap_err();
    match err {
        PipelineError::ModelConnect { endpoint, .. } => {
            assert_eq!(endpoint, format!("http://{addr}/v1"))
        }
        other => panic!("expected connect error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_error_status_keeps_code_and_body() {
    let stub = Stub::start(Duration::ZERO, |_, _| {
        (503, r#"{"error":"model is loading"}"#.to_string())
    })
    .await;
    let err = stub
        .client(|c| c)
        .complete(&request(), Duration::from_secs(5))
        .await
        .unwrap_err();

    match err {
        PipelineError::ModelHttp { status, body } => {
            assert_eq!(status, 503);
            assert!(body.contains("model is loading"));
        }
        other => panic!("expected http error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let stub = Stub::start(Duration::from_secs(5), |_, _| (200, chat_ok("late"))).await;
    let err = stub
        .client(|c| c)
        .complete(&request(), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ModelTimeout { .. }), "{err:?}");
}

#[tokio::test]
async fn test_empty_choices() {
    let stub = Stub::start(Duration::ZERO, |_, _| (200, r#"{"choices":[]}"#.to_string())).await;
    let err = stub
        .client(|c| c)
        .complete(&request(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ModelEmptyResponse));
}

#[tokio::test]
async fn test_non_json_body_is_invalid_response() {
    let stub = Stub::start(Duration::ZERO, |_, _| (200, "<html>proxy</html>".to_string())).await;
    let err = stub
        .client(|c| c)
        .complete(&request(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::ModelInvalidResponse(_)));
}

#[tokio::test]
async fn test_model_auto_detect() {
    let stub = Stub::start(Duration::ZERO, |method, path| match (method, path) {
        ("GET", "/v1/models") => (
            200,
            r#"{"data":[{"id":"qwen2.5-coder-7b"},{"id":"other"}]}"#.to_string(),
        ),
        _ => (404, String::new()),
    })
    .await;
    assert_eq!(stub.client(|c| c).resolve_model().await, "qwen2.5-coder-7b");
}

#[tokio::test]
async fn test_model_auto_detect_falls_back() {
    let stub = Stub::start(Duration::ZERO, |_, _| (500, "{}".to_string())).await;
    assert_eq!(stub.client(|c| c).resolve_model().await, FALLBACK_MODEL);

    let empty = Stub::start(Duration::ZERO, |_, _| (200, r#"{"data":[]}"#.to_string())).await;
    assert_eq!(empty.client(|c| c).resolve_model().await, FALLBACK_MODEL);
}
