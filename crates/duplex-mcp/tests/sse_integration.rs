//! Integration tests for the hybrid SSE + HTTP POST transport: the legacy
//! `endpoint`-event bootstrap driven with a bare HTTP client, the newer
//! header handshake driven through the client runtime, and the endpoint's
//! status-code matrix.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Map, Value, json};

use duplex_mcp::client::{ClientConfig, McpClient};
use duplex_mcp::core::protocol::ProtocolVersion;
use duplex_mcp::core::schema::{FieldSpec, InputSchema};
use duplex_mcp::core::types::CallToolResult;
use duplex_mcp::server::McpServer;
use duplex_mcp::server::registry::ToolFn;
use duplex_mcp::transport::sse::{
    SseClientConfig, SseClientTransport, SseDecoder, SseEvent, SseServerConfig,
};

async fn spawn_sse_server(protocol_version: ProtocolVersion) -> (McpServer, SocketAddr) {
    let server = McpServer::builder().name("S").version("1.0.0").build();

    let echo_schema = InputSchema::new()
        .field(FieldSpec::string("message").required())
        .unwrap();
    server
        .register_tool(
            "echo",
            "Echo the message back",
            echo_schema,
            Arc::new(ToolFn(|_ctx, args: Map<String, Value>| async move {
                let message = args["message"].as_str().unwrap_or_default().to_string();
                Ok::<_, duplex_mcp::core::error::McpError>(CallToolResult::text(message))
            })),
        )
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = SseServerConfig {
        protocol_version,
        max_body_bytes: 64 * 1024,
        ..Default::default()
    };
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.serve_sse_with_listener(config, listener).await;
        });
    }

    (server, addr)
}

/// Read SSE events from a live response stream, one at a time.
struct EventReader {
    stream: std::pin::Pin<
        Box<dyn futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>,
    >,
    decoder: SseDecoder,
    ready: std::collections::VecDeque<SseEvent>,
}

impl EventReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            stream: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            ready: std::collections::VecDeque::new(),
        }
    }

    async fn next_event(&mut self) -> SseEvent {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return event;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .expect("timed out waiting for sse event")
                .expect("stream ended")
                .expect("stream error");
            self.ready.extend(self.decoder.push(&chunk));
        }
    }
}

#[tokio::test]
async fn test_legacy_bootstrap_endpoint_event_flow() {
    let (_server, addr) = spawn_sse_server(ProtocolVersion::V2024_11_05).await;
    let http = reqwest::Client::new();

    // 1. Open the stream; the first event names the POST endpoint and
    //    carries the session ID as a query parameter.
    let stream_response = http
        .get(format!("http://{addr}/sse"))
        .header("Accept", "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(stream_response.status(), 200);
    let mut events = EventReader::new(stream_response);

    let endpoint = events.next_event().await;
    assert_eq!(endpoint.event.as_deref(), Some("endpoint"));
    assert!(endpoint.data.contains("sessionId="));

    // Relative endpoint URLs resolve against the GET request's URL.
    let base = url::Url::parse(&format!("http://{addr}/sse")).unwrap();
    let message_url = base.join(&endpoint.data).unwrap();

    // 2. The initialize POST is answered in the body with a 200.
    let response = http
        .post(message_url.clone())
        .json(&json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "clientInfo": {"name": "t", "version": "1"},
                "capabilities": {}
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["protocolVersion"], json!("2024-11-05"));
    assert_eq!(body["result"]["serverInfo"]["name"], json!("S"));

    // 3. Subsequent POSTs are acknowledged 204; replies arrive as events.
    let response = http
        .post(message_url.clone())
        .json(&json!({"jsonrpc": "2.0", "method": "initialized"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = http
        .post(message_url)
        .json(&json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "echo", "arguments": {"message": "over sse"}}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let message = events.next_event().await;
    assert_eq!(message.event.as_deref(), Some("message"));
    let reply: Value = serde_json::from_str(&message.data).unwrap();
    assert_eq!(reply["id"], json!(2));
    assert_eq!(reply["result"]["content"][0]["text"], json!("over sse"));
    // The legacy tool-result shape has no structured variant.
    assert!(reply["result"].get("structuredContent").is_none());
}

#[tokio::test]
async fn test_newer_handshake_through_client_runtime() {
    let (_server, addr) = spawn_sse_server(ProtocolVersion::V2025_03_26).await;

    let transport =
        SseClientTransport::new(SseClientConfig::new(format!("http://{addr}")));
    let client = McpClient::connect(
        ClientConfig {
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        Box::new(transport),
    )
    .await
    .unwrap();

    let result = client.initialize().await.unwrap();
    assert_eq!(result.protocol_version, "2025-03-26");

    let mut args = Map::new();
    args.insert("message".to_string(), json!("header handshake"));
    let result = client.call_tool("echo", Some(args)).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("header handshake"));
}

#[tokio::test]
async fn test_post_status_code_matrix() {
    let (_server, addr) = spawn_sse_server(ProtocolVersion::V2024_11_05).await;
    let http = reqwest::Client::new();

    // Wrong content type.
    let response = http
        .post(format!("http://{addr}/message?sessionId=whatever"))
        .header("Content-Type", "text/plain")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 415);

    // Unknown session.
    let response = http
        .post(format!("http://{addr}/message?sessionId=no-such-session"))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Missing session.
    let response = http
        .post(format!("http://{addr}/message"))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Wrong method on the message path.
    let response = http
        .get(format!("http://{addr}/message"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);

    // Oversized body.
    let huge = format!(
        "{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\",\"params\":{{\"pad\":\"{}\"}}}}",
        "x".repeat(128 * 1024)
    );
    let response = http
        .post(format!("http://{addr}/message?sessionId=whatever"))
        .header("Content-Type", "application/json")
        .body(huge)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn test_parse_error_post_returns_400_with_jsonrpc_body() {
    let (_server, addr) = spawn_sse_server(ProtocolVersion::V2024_11_05).await;
    let http = reqwest::Client::new();

    // A live session is needed so the frame reaches the engine.
    let stream_response = http
        .get(format!("http://{addr}/sse"))
        .send()
        .await
        .unwrap();
    let mut events = EventReader::new(stream_response);
    let endpoint = events.next_event().await;
    let base = url::Url::parse(&format!("http://{addr}/sse")).unwrap();
    let message_url = base.join(&endpoint.data).unwrap();

    let response = http
        .post(message_url)
        .header("Content-Type", "application/json")
        .body("{this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], json!(-32700));
}
