//! Control-plane protocol tests over real sockets.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use slirc_bot::bot::Bot;
use slirc_bot::transport::frame::JsonCodec;
use slirc_bot::transport::TransportServer;

const WAIT: Duration = Duration::from_secs(10);

type Wire = Framed<TcpStream, JsonCodec>;

async fn start_daemon(password: Option<&str>) -> SocketAddr {
    let mut bot = Bot::new();

    let transport = TransportServer::bind_tcp(
        "127.0.0.1:0".parse().unwrap(),
        password.map(str::to_owned),
    )
    .await
    .unwrap();
    let addr = transport.local_addr().unwrap();

    bot.attach_transport(transport);
    tokio::spawn(async move { bot.run().await });

    addr
}

async fn connect(addr: SocketAddr) -> Wire {
    let stream = timeout(WAIT, TcpStream::connect(addr))
        .await
        .expect("connect timed out")
        .expect("connect failed");

    Framed::new(stream, JsonCodec)
}

async fn recv(wire: &mut Wire) -> Value {
    timeout(WAIT, wire.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
        .expect("bad frame")
}

async fn send(wire: &mut Wire, value: Value) {
    wire.send(value).await.expect("send failed");
}

async fn expect_closed(wire: &mut Wire) {
    let next = timeout(WAIT, wire.next()).await.expect("timed out");
    assert!(next.is_none(), "expected the connection to be closed");
}

async fn expect_greeting(wire: &mut Wire) {
    let greeting = recv(wire).await;

    assert_eq!(greeting["program"], "slirc-bot");
    assert!(greeting["major"].is_u64());
    assert!(greeting["minor"].is_u64());
    assert!(greeting["patch"].is_u64());
    assert_eq!(greeting["javascript"], false);
    assert!(greeting["ssl"].is_boolean());
}

#[tokio::test]
async fn test_command_before_auth_is_refused() {
    let addr = start_daemon(Some("x")).await;
    let mut wire = connect(addr).await;

    expect_greeting(&mut wire).await;

    send(&mut wire, json!({ "command": "server-list" })).await;

    let error = recv(&mut wire).await;
    assert_eq!(error["error"], 1);
    assert_eq!(error["errorCategory"], "transport");
    assert_eq!(error["errorMessage"], "authentication required");

    // The connection is closed once the reply is flushed.
    expect_closed(&mut wire).await;
}

#[tokio::test]
async fn test_wrong_password_is_refused() {
    let addr = start_daemon(Some("x")).await;
    let mut wire = connect(addr).await;

    expect_greeting(&mut wire).await;

    send(&mut wire, json!({ "command": "auth", "password": "wrong" })).await;

    let error = recv(&mut wire).await;
    assert_eq!(error["errorCategory"], "transport");
    assert_eq!(error["errorMessage"], "invalid authentication");
    assert_eq!(error["command"], "auth");

    expect_closed(&mut wire).await;
}

#[tokio::test]
async fn test_authenticated_command_session() {
    let addr = start_daemon(Some("x")).await;
    let mut wire = connect(addr).await;

    expect_greeting(&mut wire).await;

    send(&mut wire, json!({ "command": "auth", "password": "x" })).await;
    assert_eq!(recv(&mut wire).await, json!({ "command": "auth" }));

    // Rules: add one, inspect the list.
    send(
        &mut wire,
        json!({ "command": "rule-add", "channels": ["#spam"], "action": "drop" }),
    )
    .await;
    assert_eq!(recv(&mut wire).await["command"], "rule-add");

    send(&mut wire, json!({ "command": "rule-list" })).await;
    let rules = recv(&mut wire).await;
    assert_eq!(rules["command"], "rule-list");
    assert_eq!(rules["list"][0]["action"], "drop");
    assert_eq!(rules["list"][0]["channels"][0], "#spam");

    // Servers: connect one against a local listener, list, clear all.
    let idle = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let idle_port = idle.local_addr().unwrap().port();

    send(
        &mut wire,
        json!({
            "command": "server-connect",
            "name": "tmp",
            "hostname": "127.0.0.1",
            "port": idle_port,
            "ipv6": false,
        }),
    )
    .await;
    assert_eq!(recv(&mut wire).await["command"], "server-connect");

    send(&mut wire, json!({ "command": "server-list" })).await;
    let servers = recv(&mut wire).await;
    assert_eq!(servers["list"], json!(["tmp"]));

    // Disconnect without a server argument clears everything.
    send(&mut wire, json!({ "command": "server-disconnect" })).await;
    assert_eq!(recv(&mut wire).await["command"], "server-disconnect");

    send(&mut wire, json!({ "command": "server-list" })).await;
    let servers = recv(&mut wire).await;
    assert_eq!(servers["list"], json!([]));
}

#[tokio::test]
async fn test_no_password_is_ready_immediately() {
    let addr = start_daemon(None).await;
    let mut wire = connect(addr).await;

    expect_greeting(&mut wire).await;

    send(&mut wire, json!({ "command": "server-list" })).await;
    let reply = recv(&mut wire).await;
    assert_eq!(reply["command"], "server-list");
    assert_eq!(reply["list"], json!([]));
}

#[tokio::test]
async fn test_unknown_command_is_an_error() {
    let addr = start_daemon(None).await;
    let mut wire = connect(addr).await;

    expect_greeting(&mut wire).await;

    send(&mut wire, json!({ "command": "does-not-exist" })).await;

    let error = recv(&mut wire).await;
    assert_eq!(error["errorCategory"], "bot");
    assert_eq!(error["errorMessage"], "invalid command");
    assert_eq!(error["command"], "does-not-exist");

    expect_closed(&mut wire).await;
}

#[tokio::test]
async fn test_command_error_reports_the_kind() {
    let addr = start_daemon(None).await;
    let mut wire = connect(addr).await;

    expect_greeting(&mut wire).await;

    // Unknown server: the typed error triple comes back.
    send(
        &mut wire,
        json!({ "command": "server-join", "server": "nope", "channel": "#c" }),
    )
    .await;

    let error = recv(&mut wire).await;
    assert_eq!(error["errorCategory"], "server");
    assert_eq!(error["errorMessage"], "server not found");
    assert_eq!(error["command"], "server-join");

    expect_closed(&mut wire).await;
}

#[tokio::test]
async fn test_malformed_frame_is_invalid_message() {
    let addr = start_daemon(None).await;
    let mut wire = connect(addr).await;

    expect_greeting(&mut wire).await;

    wire.get_mut()
        .write_all(b"{this is not json}\r\n\r\n")
        .await
        .unwrap();

    let error = recv(&mut wire).await;
    assert_eq!(error["errorCategory"], "bot");
    assert_eq!(error["errorMessage"], "invalid message");
}

#[tokio::test]
async fn test_non_object_message_is_invalid_message() {
    let addr = start_daemon(None).await;
    let mut wire = connect(addr).await;

    expect_greeting(&mut wire).await;

    send(&mut wire, json!([1, 2, 3])).await;

    let error = recv(&mut wire).await;
    assert_eq!(error["errorCategory"], "bot");
    assert_eq!(error["errorMessage"], "invalid message");
}
