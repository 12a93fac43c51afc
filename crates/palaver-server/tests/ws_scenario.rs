//! End-to-end protocol scenarios over a real WebSocket connection.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use palaver_core::message::MessageKind;
use palaver_core::protocol::ServerFrame;
use palaver_server::{start, ServerConfig, ServerHandle};
use palaver_store::{Database, UserRepo};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (ServerHandle, UserRepo) {
    let db = Database::in_memory().unwrap();
    let users = UserRepo::new(db.clone());
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..Default::default()
    };
    let handle = start(config, db).await.unwrap();
    (handle, users)
}

async fn connect(port: u16) -> Client {
    let (ws, _) = connect_async(format!("ws://127.0.0.1:{port}/ws"))
        .await
        .expect("connect");
    ws
}

async fn send(ws: &mut Client, raw: &str) {
    ws.send(Message::text(raw)).await.expect("send");
}

/// Next text frame, decoded. Skips transport chatter like pings.
async fn recv(ws: &mut Client) -> ServerFrame {
    loop {
        let msg = ws
            .next()
            .await
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("frame json");
        }
    }
}

async fn login(ws: &mut Client, username: &str, password: &str) {
    send(
        ws,
        &format!(r#"{{"type":"login","username":"{username}","password":"{password}"}}"#),
    )
    .await;
}

#[tokio::test]
async fn two_client_chat_scenario() {
    let (handle, users) = start_server().await;
    users.create("alice", "pw1234", false).unwrap();
    users.create("bob", "pw5678", false).unwrap();

    // Alice logs in: login_ok, empty history, then presence with just her.
    let mut a = connect(handle.port).await;
    login(&mut a, "alice", "pw1234").await;
    assert_eq!(
        recv(&mut a).await,
        ServerFrame::LoginOk {
            username: "alice".into(),
            is_admin: false,
        }
    );
    assert_eq!(recv(&mut a).await, ServerFrame::History { messages: vec![] });
    assert_eq!(
        recv(&mut a).await,
        ServerFrame::Presence {
            online: vec!["alice".into()]
        }
    );

    // Bob logs in: both clients see the updated online set.
    let mut b = connect(handle.port).await;
    login(&mut b, "bob", "pw5678").await;
    assert_eq!(
        recv(&mut b).await,
        ServerFrame::LoginOk {
            username: "bob".into(),
            is_admin: false,
        }
    );
    assert_eq!(recv(&mut b).await, ServerFrame::History { messages: vec![] });
    let both = ServerFrame::Presence {
        online: vec!["alice".into(), "bob".into()],
    };
    assert_eq!(recv(&mut b).await, both);
    assert_eq!(recv(&mut a).await, both);

    // Alice sends; the broadcast is her echo and Bob's copy.
    send(&mut a, r#"{"type":"send","kind":"text","content":"hi"}"#).await;
    for ws in [&mut a, &mut b] {
        match recv(ws).await {
            ServerFrame::Message { message } => {
                assert_eq!(message.id, 1);
                assert_eq!(message.username, "alice");
                assert_eq!(message.kind, MessageKind::Text);
                assert_eq!(message.content, "hi");
                assert_eq!(message.reply_to, None);
            }
            other => panic!("expected message frame, got: {other:?}"),
        }
    }

    // Bob disconnects; Alice sees the shrunken online set.
    b.close(None).await.unwrap();
    assert_eq!(
        recv(&mut a).await,
        ServerFrame::Presence {
            online: vec!["alice".into()]
        }
    );
}

#[tokio::test]
async fn history_round_trips_across_reconnect() {
    let (handle, users) = start_server().await;
    users.create("alice", "pw1234", false).unwrap();

    let mut a = connect(handle.port).await;
    login(&mut a, "alice", "pw1234").await;
    recv(&mut a).await; // login_ok
    recv(&mut a).await; // history
    recv(&mut a).await; // presence

    send(&mut a, r#"{"type":"send","kind":"text","content":"first"}"#).await;
    let live = match recv(&mut a).await {
        ServerFrame::Message { message } => message,
        other => panic!("expected message frame, got: {other:?}"),
    };
    send(
        &mut a,
        &format!(
            r#"{{"type":"send","kind":"sticker","sticker":"wave","reply_to":{}}}"#,
            live.id
        ),
    )
    .await;
    recv(&mut a).await; // sticker broadcast
    a.close(None).await.unwrap();

    // Reconnect: history carries identical ids, kinds, and references.
    let mut again = connect(handle.port).await;
    login(&mut again, "alice", "pw1234").await;
    recv(&mut again).await; // login_ok
    match recv(&mut again).await {
        ServerFrame::History { messages } => {
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].id, live.id);
            assert_eq!(messages[0].kind, MessageKind::Text);
            assert_eq!(messages[0].content, "first");
            assert_eq!(messages[1].kind, MessageKind::Sticker);
            assert_eq!(messages[1].sticker.as_deref(), Some("wave"));
            assert_eq!(messages[1].reply_to, Some(live.id));
        }
        other => panic!("expected history frame, got: {other:?}"),
    }
}

#[tokio::test]
async fn protocol_rejections_over_the_wire() {
    let (handle, users) = start_server().await;
    users.create("root", "root1", true).unwrap();

    let mut ws = connect(handle.port).await;

    send(&mut ws, r#"{"type":"send","content":"hi"}"#).await;
    assert_eq!(recv(&mut ws).await, ServerFrame::error("Please login first"));

    send(&mut ws, r#"{"type":"join"}"#).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerFrame::error("Rooms are disabled. Single chat only.")
    );

    send(&mut ws, r#"{"type":"teleport"}"#).await;
    assert_eq!(recv(&mut ws).await, ServerFrame::error("Unknown type: teleport"));

    send(&mut ws, "not json").await;
    assert_eq!(recv(&mut ws).await, ServerFrame::error("Invalid JSON"));

    // The connection survived all of that; log in and use it.
    login(&mut ws, "root", "root1").await;
    match recv(&mut ws).await {
        ServerFrame::LoginOk { username, is_admin } => {
            assert_eq!(username, "root");
            assert!(is_admin);
        }
        other => panic!("expected login_ok, got: {other:?}"),
    }
    recv(&mut ws).await; // history
    recv(&mut ws).await; // presence

    send(
        &mut ws,
        r#"{"type":"admin_create_user","username":"carol","password":"pw0000"}"#,
    )
    .await;
    assert_eq!(
        recv(&mut ws).await,
        ServerFrame::AdminCreateUserOk {
            username: "carol".into()
        }
    );
    assert!(users.get_by_username("carol").unwrap().is_some());
}
