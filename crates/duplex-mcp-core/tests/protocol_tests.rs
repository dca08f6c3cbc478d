//! Cross-module protocol laws: serialize-then-parse round trips, frame
//! classification, and schema binding against realistic payloads.

use serde_json::json;

use duplex_mcp_core::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse,
    ProtocolVersion, RequestId,
};
use duplex_mcp_core::schema::{FieldSpec, InputSchema, bind_arguments};
use duplex_mcp_core::types::{CallToolResult, Content};
use duplex_mcp_core::uri_template::UriTemplate;

#[test]
fn test_every_message_kind_round_trips() {
    let messages = vec![
        JsonRpcMessage::Request(JsonRpcRequest::new(
            RequestId::number(1),
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"message": "hi"}})),
        )),
        JsonRpcMessage::Request(JsonRpcRequest::new(RequestId::string("abc"), "ping", None)),
        JsonRpcMessage::Notification(JsonRpcNotification::new(
            "$/progress",
            Some(json!({"token": "p", "value": "working"})),
        )),
        JsonRpcMessage::Response(JsonRpcResponse::success(
            RequestId::number(2),
            json!({"items": []}),
        )),
    ];

    for original in messages {
        let bytes = serde_json::to_vec(&original).unwrap();
        let reparsed = JsonRpcPayload::parse(&bytes).unwrap();
        assert_eq!(JsonRpcPayload::Single(original), reparsed);
    }
}

#[test]
fn test_batch_round_trip_preserves_order_and_kinds() {
    let batch = JsonRpcPayload::Batch(vec![
        JsonRpcMessage::Request(JsonRpcRequest::new(RequestId::number(1), "ping", None)),
        JsonRpcMessage::Notification(JsonRpcNotification::new("initialized", None)),
        JsonRpcMessage::Request(JsonRpcRequest::new(RequestId::number(2), "tools/list", None)),
    ]);

    let bytes = serde_json::to_vec(&batch).unwrap();
    let reparsed = JsonRpcPayload::parse(&bytes).unwrap();
    assert_eq!(batch, reparsed);
}

#[test]
fn test_tool_result_wire_shape_per_revision() {
    let result = CallToolResult {
        content: vec![Content::text("4")],
        is_error: None,
        structured_content: Some(json!({"value": 4})),
    };

    let newer = result.to_wire(ProtocolVersion::V2025_03_26);
    let legacy = result.to_wire(ProtocolVersion::V2024_11_05);

    assert_eq!(newer["structuredContent"]["value"], json!(4));
    assert!(legacy.get("structuredContent").is_none());
    assert_eq!(newer["content"], legacy["content"]);
}

#[test]
fn test_calculator_binding_end_to_end() {
    let schema = InputSchema::new()
        .field(
            FieldSpec::string("operation")
                .required()
                .enum_values(["add", "divide"]),
        )
        .unwrap()
        .field(FieldSpec::number("operand1").required())
        .unwrap()
        .field(FieldSpec::number("operand2").required())
        .unwrap();

    let good = json!({"operation": "divide", "operand1": 10, "operand2": 0});
    let bound = bind_arguments(&schema, good.as_object()).unwrap();
    assert_eq!(bound["operand2"], json!(0));

    let bad = json!({"operation": "exponentiate"});
    let err = bind_arguments(&schema, bad.as_object()).unwrap_err();
    assert_eq!(err.violations.len(), 3);
}

#[test]
fn test_template_and_find_resource_agree() {
    let template = UriTemplate::parse("users/{userId}/posts/{postId}").unwrap();

    // Matching twice gives the same bindings (deterministic resolution).
    let first = template.matches("users/42/posts/7").unwrap();
    let second = template.matches("users/42/posts/7").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.get("userId"), Some("42"));
    assert!(template.matches("users/42/other").is_none());
}
