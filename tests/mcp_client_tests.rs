#![cfg(feature = "http-server")]

use agentry::tool_protocol::{list_tools_scoped, ToolProtocol, NO_RESULT};
use agentry::tool_protocols::McpClientProtocol;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeServer {
    deletes: AtomicUsize,
    session_headers: Mutex<Vec<Option<String>>>,
}

fn tool_result(id: &Value, content: Value, is_error: bool) -> Response {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {"content": content, "isError": is_error}
    }))
    .into_response()
}

async fn handle(
    State(server): State<Arc<FakeServer>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Response {
    let session = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or_default().to_string();
    if method != "initialize" {
        server.session_headers.lock().unwrap().push(session);
    }

    match method.as_str() {
        "initialize" => (
            [("mcp-session-id", "session-1")],
            Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake", "version": "0.0.1"}
                }
            })),
        )
            .into_response(),
        "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
        "tools/list" => {
            let page = if request["params"]["cursor"] == "page-2" {
                json!({"tools": [{"name": "link", "description": "Returns a link"}]})
            } else {
                json!({
                    "tools": [{
                        "name": "calculator",
                        "description": "Evaluate an expression\nLong details",
                        "inputSchema": {"type": "object", "properties": {"expr": {"type": "string"}}}
                    }],
                    "nextCursor": "page-2"
                })
            };
            Json(json!({"jsonrpc": "2.0", "id": id, "result": page})).into_response()
        }
        "tools/call" => match request["params"]["name"].as_str().unwrap_or_default() {
            "calculator" => {
                let expr = request["params"]["arguments"]["expr"].as_str().unwrap_or_default();
                let text = if expr == "2+2" { "4" } else { "?" };
                tool_result(&id, json!([{"type": "text", "text": text}]), false)
            }
            "link" => tool_result(
                &id,
                json!([{"type": "resource_link", "uri": "file:///tmp/out.csv", "name": "out"}]),
                false,
            ),
            "image" => tool_result(
                &id,
                json!([{"type": "image", "data": "AAAA", "mimeType": "image/png"}]),
                false,
            ),
            "fails" => tool_result(
                &id,
                json!([{"type": "text", "text": "division by zero"}]),
                true,
            ),
            "streamed" => {
                let body = format!(
                    "event: message\ndata: {}\n\n",
                    json!({"jsonrpc": "2.0", "id": id, "result": {"content": [{"type": "text", "text": "from sse"}]}})
                );
                ([("content-type", "text/event-stream")], body).into_response()
            }
            other => Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32602, "message": format!("Unknown tool: {}", other)}
            }))
            .into_response(),
        },
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn terminate(State(server): State<Arc<FakeServer>>) -> StatusCode {
    server.deletes.fetch_add(1, Ordering::SeqCst);
    StatusCode::OK
}

async fn start_server() -> (String, Arc<FakeServer>) {
    let server = Arc::new(FakeServer::default());
    let app = Router::new()
        .route("/mcp", post(handle).delete(terminate))
        .with_state(Arc::clone(&server));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/mcp", addr), server)
}

#[tokio::test]
async fn test_list_tools_follows_cursor_and_closes_session() {
    let (url, server) = start_server().await;
    let mcp = McpClientProtocol::new(url);

    let tools = list_tools_scoped(&mcp).await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["calculator", "link"]);
    assert_eq!(tools[0].summary(), "Evaluate an expression");
    assert_eq!(tools[0].parameters["properties"]["expr"]["type"], "string");

    assert_eq!(server.deletes.load(Ordering::SeqCst), 1);
    let headers = server.session_headers.lock().unwrap();
    assert!(headers.iter().all(|h| h.as_deref() == Some("session-1")));
}

#[tokio::test]
async fn test_invoke_extracts_content() {
    let (url, _server) = start_server().await;
    let mcp = McpClientProtocol::new(url);
    let connection = mcp.connect().await.unwrap();

    assert_eq!(
        connection.invoke("calculator", json!({"expr": "2+2"})).await.unwrap(),
        "4"
    );
    assert_eq!(
        connection.invoke("link", json!({})).await.unwrap(),
        "file:///tmp/out.csv"
    );
    assert_eq!(connection.invoke("image", json!({})).await.unwrap(), NO_RESULT);
    assert_eq!(connection.invoke("streamed", json!({})).await.unwrap(), "from sse");
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_tool_errors_surface_as_failures() {
    let (url, _server) = start_server().await;
    let mcp = McpClientProtocol::new(url);
    let connection = mcp.connect().await.unwrap();

    let err = connection.invoke("fails", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("division by zero"));

    let err = connection.invoke("missing", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("Unknown tool: missing"));
    connection.close().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_fails_connect() {
    // nothing listens on the discard port
    let mcp = McpClientProtocol::new("http://127.0.0.1:9/mcp");
    assert!(mcp.connect().await.is_err());
}
