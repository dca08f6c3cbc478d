//! End-to-end over the line-framed transport: a real server loop on one end
//! of an in-memory duplex pipe, the client runtime on the other.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};

use duplex_mcp_client::{ClientConfig, McpClient, SamplingHandler};
use duplex_mcp_core::error::McpResult;
use duplex_mcp_core::protocol::{ClientCapabilities, ProtocolVersion};
use duplex_mcp_core::schema::{FieldSpec, InputSchema};
use duplex_mcp_core::types::{
    CallToolResult, Content, CreateMessageRequest, CreateMessageResult, Role,
};
use duplex_mcp_server::McpServer;
use duplex_mcp_server::RequestContext;
use duplex_mcp_server::registry::ToolFn;
use duplex_mcp_transport::line::pair;

async fn spawn_echo_server() -> (McpServer, tokio::task::JoinHandle<()>, McpClient) {
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
                Ok::<_, duplex_mcp_core::error::McpError>(CallToolResult::text(message))
            })),
        )
        .await
        .unwrap();

    // A tool that turns around and asks the client's LLM.
    server
        .register_tool(
            "consult",
            "Ask the connected model a question",
            InputSchema::new()
                .field(FieldSpec::string("question").required())
                .unwrap(),
            Arc::new(ToolFn(|ctx: RequestContext, args: Map<String, Value>| async move {
                let question = args["question"].as_str().unwrap_or_default().to_string();
                let request = CreateMessageRequest {
                    messages: vec![duplex_mcp_core::types::SamplingMessage::user(question)],
                    max_tokens: Some(64),
                    ..Default::default()
                };
                let answer = ctx.create_message(request).await?;
                let text = answer.content.as_text().unwrap_or_default().to_string();
                Ok(CallToolResult::text(text))
            })),
        )
        .await
        .unwrap();

    let (client_side, server_side) = pair();
    let serving = {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.serve_line(server_side).await;
        })
    };

    let config = ClientConfig {
        capabilities: serde_json::from_value::<ClientCapabilities>(
            json!({"sampling": {}, "tools": {"listChanged": true}}),
        )
        .unwrap(),
        request_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let client = McpClient::connect(config, Box::new(client_side)).await.unwrap();

    (server, serving, client)
}

#[tokio::test]
async fn test_full_handshake_and_echo() {
    let (_server, _serving, client) = spawn_echo_server().await;

    let result = client.initialize().await.unwrap();
    assert_eq!(result.protocol_version, "2025-03-26");
    assert_eq!(result.server_info.name, "S");
    assert_eq!(
        client.negotiated_version().await,
        Some(ProtocolVersion::V2025_03_26)
    );

    let tools = client.list_tools(None).await.unwrap();
    let names: Vec<&str> = tools.items.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"echo"));

    let mut args = Map::new();
    args.insert("message".to_string(), json!("hi"));
    let result = client.call_tool("echo", Some(args)).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("hi"));
    assert!(!result.is_error());
}

#[tokio::test]
async fn test_call_before_initialize_rejected() {
    let (_server, _serving, client) = spawn_echo_server().await;

    let err = client.list_tools(None).await.unwrap_err();
    match err {
        duplex_mcp_core::error::McpError::Rpc(error) => {
            assert_eq!(error.code, -32600);
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_server_initiated_sampling_round_trip() {
    let (_server, _serving, client) = spawn_echo_server().await;

    struct CannedModel;
    #[async_trait::async_trait]
    impl SamplingHandler for CannedModel {
        async fn create_message(
            &self,
            request: CreateMessageRequest,
        ) -> McpResult<CreateMessageResult> {
            let question = request.messages[0].content.as_text().unwrap_or_default();
            Ok(CreateMessageResult {
                role: Role::Assistant,
                content: Content::text(format!("echoing: {question}")),
                model: "canned-model".to_string(),
                stop_reason: Some("endTurn".to_string()),
            })
        }
    }
    client.set_sampling_handler(Arc::new(CannedModel)).await;

    client.initialize().await.unwrap();

    let mut args = Map::new();
    args.insert("question".to_string(), json!("what is up"));
    let result = client.call_tool("consult", Some(args)).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("echoing: what is up"));
}

#[tokio::test]
async fn test_progress_notifications_reach_subscriber() {
    let server = McpServer::builder().name("S").version("1.0.0").build();
    server
        .register_tool(
            "worker",
            "Reports progress then finishes",
            InputSchema::new(),
            Arc::new(ToolFn(|ctx: RequestContext, _args: Map<String, Value>| async move {
                ctx.progress().report_percent("halfway", 50.0);
                ctx.progress().report_percent("done", 100.0);
                Ok::<_, duplex_mcp_core::error::McpError>(CallToolResult::text("finished"))
            })),
        )
        .await
        .unwrap();

    let (client_side, server_side) = pair();
    {
        let server = server.clone();
        tokio::spawn(async move {
            let _ = server.serve_line(server_side).await;
        });
    }

    let client = McpClient::connect(ClientConfig::default(), Box::new(client_side))
        .await
        .unwrap();
    let mut notifications = client.notifications();
    client.initialize().await.unwrap();

    let result = client
        .call_tool_with_progress("worker", None, json!("tok-1"))
        .await
        .unwrap();
    assert_eq!(result.content[0].as_text(), Some("finished"));

    let first = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.method, "$/progress");
    let params = first.params.unwrap();
    assert_eq!(params["token"], json!("tok-1"));
    assert_eq!(params["value"]["percentage"], json!(50.0));
}

#[tokio::test]
async fn test_graceful_shutdown_fails_in_flight_waits() {
    let (server, serving, client) = spawn_echo_server().await;
    client.initialize().await.unwrap();

    server.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(2), serving).await;

    let result = client.ping().await;
    assert!(result.is_err());
}
