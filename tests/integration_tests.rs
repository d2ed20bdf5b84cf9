//! End-to-end integration tests over a real TCP socket, WebSocket upgrade with
//! sub-protocol negotiation, handshake and the subscription lifecycle.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt, stream};
use gqlws_protocol::GraphQLError;
use gqlws_server::{
    ExecutionResult, Executor, OperationContext, OperationRequest, ResultStream, ServerOptions,
    SubscriptionServer,
};
use gqlws_transport::{ConnectionConfig, TokenAuthenticator, TransportConfig, TransportServer};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Ticks every 20ms until cancelled.
struct FastTicker;

impl Executor for FastTicker {
    async fn subscribe(
        &self,
        request: OperationRequest,
        ctx: OperationContext,
    ) -> Result<ResultStream, Vec<GraphQLError>> {
        if !request.query.contains("tick") {
            return Err(vec![GraphQLError::new("Cannot query field")]);
        }
        let limit = request
            .variables
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(u64::MAX);
        let ticks = stream::unfold(1u64, |n| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Some((ExecutionResult::new(json!({"tick": n})), n + 1))
        })
        .take(limit as usize)
        .take_until(ctx.cancellation.cancelled_owned());
        Ok(ticks.boxed())
    }
}

struct TestServer {
    port: u16,
    server: Arc<SubscriptionServer<FastTicker>>,
    transport: TransportServer,
}

impl TestServer {
    async fn start(max_connections: usize, token: Option<&str>, options: ServerOptions) -> Self {
        let server = Arc::new(SubscriptionServer::new(FastTicker).with_options(options));
        let mut connection = ConnectionConfig::new(server.clone()).with_read_limit(1024);
        if let Some(token) = token {
            connection = connection.with_authenticator(TokenAuthenticator::new(token));
        }
        let config = TransportConfig {
            port: 0, // OS-assigned
            hostname: "127.0.0.1".into(),
            path: "/graphql".into(),
            max_connections: Some(max_connections),
            enable_cors: false,
        };
        let transport = TransportServer::start(config, connection).await.unwrap();
        Self {
            port: transport.port(),
            server,
            transport,
        }
    }

    async fn start_default() -> Self {
        Self::start(16, None, ServerOptions::default()).await
    }

    fn url(&self) -> String {
        format!("ws://127.0.0.1:{}/graphql", self.port)
    }

    async fn connect(&self) -> Socket {
        let mut request = self.url().into_client_request().unwrap();
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("graphql-ws"));
        let (ws, response) = connect_async(request).await.expect("Failed to connect");
        assert_eq!(
            response.headers().get("sec-websocket-protocol").unwrap(),
            "graphql-ws"
        );
        ws
    }

    async fn health(&self) -> Value {
        reqwest::get(format!("http://127.0.0.1:{}/health", self.port))
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn wait_for_health(&self, key: &str, expected: u64) {
        timeout(Duration::from_secs(5), async {
            while self.health().await[key] != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("health {key} never reached {expected}"));
    }
}

async fn send(ws: &mut Socket, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn recv(ws: &mut Socket) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// True once the server has closed the socket.
async fn closed_by_server(ws: &mut Socket) -> bool {
    timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_reports_counts() {
    let server = TestServer::start_default().await;
    let health = server.health().await;
    assert_eq!(health, json!({"status": "ok", "connections": 0, "operations": 0}));
}

#[tokio::test]
async fn subscription_lifecycle_over_websocket() {
    let server = TestServer::start_default().await;
    let mut ws = server.connect().await;

    send(&mut ws, json!({"type": "connection_init", "payload": {}})).await;
    assert_eq!(recv(&mut ws).await, json!({"type": "connection_ack"}));

    send(
        &mut ws,
        json!({"id": "1", "type": "start", "payload": {"query": "subscription { tick }"}}),
    )
    .await;
    let first = recv(&mut ws).await;
    assert_eq!(first, json!({"id": "1", "type": "data", "payload": {"data": {"tick": 1}}}));
    assert_eq!(recv(&mut ws).await["payload"]["data"]["tick"], 2);
    server.wait_for_health("operations", 1).await;
    assert_eq!(server.health().await["connections"], 1);

    send(&mut ws, json!({"id": "1", "type": "stop"})).await;
    server.wait_for_health("operations", 0).await;

    // Frames queued before the stop may still drain; the socket stays open.
    let quiet = timeout(Duration::from_millis(200), async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    assert!(quiet.is_err(), "connection closed unexpectedly");

    send(&mut ws, json!({"type": "connection_terminate"})).await;
    assert!(closed_by_server(&mut ws).await);
    server.wait_for_health("connections", 0).await;
    assert!(server.server.registry().is_empty());
}

#[tokio::test]
async fn finite_stream_completes_when_enabled() {
    let server = TestServer::start(
        16,
        None,
        ServerOptions::default().with_complete_on_stream_end(true),
    )
    .await;
    let mut ws = server.connect().await;

    send(&mut ws, json!({"type": "connection_init"})).await;
    assert_eq!(recv(&mut ws).await["type"], "connection_ack");
    send(
        &mut ws,
        json!({
            "id": "a",
            "type": "start",
            "payload": {"query": "subscription { tick }", "variables": {"limit": 2}},
        }),
    )
    .await;

    assert_eq!(recv(&mut ws).await["payload"]["data"]["tick"], 1);
    assert_eq!(recv(&mut ws).await["payload"]["data"]["tick"], 2);
    assert_eq!(recv(&mut ws).await, json!({"id": "a", "type": "complete"}));
}

#[tokio::test]
async fn executor_errors_are_scoped_to_the_operation() {
    let server = TestServer::start_default().await;
    let mut ws = server.connect().await;

    send(&mut ws, json!({"type": "connection_init"})).await;
    assert_eq!(recv(&mut ws).await["type"], "connection_ack");

    send(
        &mut ws,
        json!({"id": "1", "type": "start", "payload": {"query": "subscription { nope }"}}),
    )
    .await;
    assert_eq!(
        recv(&mut ws).await,
        json!({"id": "1", "type": "error", "payload": [{"message": "Cannot query field"}]})
    );

    // The connection survives and still serves operations.
    send(
        &mut ws,
        json!({"id": "2", "type": "start", "payload": {"query": "subscription { tick }"}}),
    )
    .await;
    assert_eq!(recv(&mut ws).await["id"], "2");
}

#[tokio::test]
async fn token_authentication() {
    let server = TestServer::start(16, Some("secret"), ServerOptions::default()).await;
    let mut ws = server.connect().await;

    send(&mut ws, json!({"type": "connection_init", "payload": {"authToken": "nope"}})).await;
    let reply = recv(&mut ws).await;
    assert_eq!(reply["type"], "connection_error");
    assert!(reply["payload"].as_str().unwrap().contains("invalid credentials"));

    send(
        &mut ws,
        json!({"type": "connection_init", "payload": {"Authorization": "Bearer secret"}}),
    )
    .await;
    assert_eq!(recv(&mut ws).await, json!({"type": "connection_ack"}));
}

#[tokio::test]
async fn upgrade_without_subprotocol_is_closed() {
    let server = TestServer::start_default().await;
    let (mut ws, _) = connect_async(server.url()).await.expect("Failed to connect");

    assert!(closed_by_server(&mut ws).await);
    assert_eq!(server.health().await["connections"], 0);
}

#[tokio::test]
async fn connections_over_the_limit_get_503() {
    let server = TestServer::start(1, None, ServerOptions::default()).await;
    let _first = server.connect().await;
    server.wait_for_health("connections", 1).await;
    assert_eq!(server.transport.connection_count(), 1);

    let mut request = server.url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("graphql-ws"));
    match connect_async(request).await {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
        other => panic!("expected HTTP 503, got {:?}", other.map(|(_, r)| r.status())),
    }
    assert_eq!(server.transport.connection_count(), 1);
}

#[tokio::test]
async fn oversized_frame_closes_the_connection() {
    let server = TestServer::start_default().await;
    let mut ws = server.connect().await;

    send(&mut ws, json!({"type": "connection_init"})).await;
    assert_eq!(recv(&mut ws).await["type"], "connection_ack");

    let query = format!("subscription {{ tick }} # {}", "x".repeat(2048));
    let _ = ws
        .send(Message::text(
            json!({"id": "1", "type": "start", "payload": {"query": query}}).to_string(),
        ))
        .await;
    assert!(closed_by_server(&mut ws).await);
    server.wait_for_health("connections", 0).await;
}

#[tokio::test]
async fn transport_stops_cleanly() {
    let mut server = TestServer::start_default().await;
    server.transport.stop().await;
    assert!(TcpStream::connect(("127.0.0.1", server.port)).await.is_err());
}
