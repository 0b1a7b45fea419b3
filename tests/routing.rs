//! End-to-end routing tests against a real listener on loopback.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use chat_router::codec::{read_frame, write_frame};
use chat_router::{ChatError, ChatServer, Connection, Message, Registry, SessionConfig};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Helper struct to manage an in-process server
struct TestServer {
    addr: SocketAddr,
    registry: Registry,
    shutdown: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::spawn();
        let server = ChatServer::new(listener, registry.clone(), SessionConfig::default());
        let addr = server.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.run(shutdown.clone()));

        TestServer {
            addr,
            registry,
            shutdown,
        }
    }

    async fn connect(&self) -> Connection {
        let stream = TcpStream::connect(self.addr).await.unwrap();
        Connection::new(stream, Some(self.addr))
    }

    /// Connect and register, consuming the welcome notice
    async fn login(&self, username: &str) -> Connection {
        let conn = self.connect().await;
        conn.send(&Message::Registration {
            username: username.into(),
        })
        .await
        .unwrap();
        let welcome = recv(&conn).await;
        assert!(
            matches!(&welcome, Message::ServerNotice { text, .. } if text.contains("Welcome")),
            "unexpected first message: {:?}",
            welcome
        );
        conn
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn recv(conn: &Connection) -> Message {
    tokio::time::timeout(RECV_TIMEOUT, conn.receive())
        .await
        .expect("timed out waiting for a message")
        .expect("connection failed")
}

/// Receive until `expected` arrives, skipping anything else
async fn recv_until(conn: &Connection, expected: &Message) {
    loop {
        if &recv(conn).await == expected {
            return;
        }
    }
}

async fn expect_closed(conn: &Connection) {
    loop {
        match tokio::time::timeout(RECV_TIMEOUT, conn.receive())
            .await
            .expect("timed out waiting for close")
        {
            Ok(_) => continue,
            Err(ChatError::ConnectionClosed) | Err(ChatError::ConnectionIo(_)) => return,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}

async fn join(conn: &Connection, username: &str, room: &str) {
    conn.send(&Message::RoomJoin {
        username: username.into(),
        room: room.into(),
    })
    .await
    .unwrap();
    recv_until(
        conn,
        &Message::room_notice(room, format!("{} joined the room", username)),
    )
    .await;
}

#[tokio::test]
async fn test_room_broadcast_dm_and_disconnect() {
    let server = TestServer::start().await;

    let alice = server.login("alice").await;
    join(&alice, "alice", "g").await;
    let bob = server.login("bob").await;
    join(&bob, "bob", "g").await;
    recv_until(&alice, &Message::room_notice("g", "bob joined the room")).await;

    // Sender identity is rewritten; sender is a member and gets its own copy
    alice
        .send(&Message::room_chat("mallory", "g", "hi"))
        .await
        .unwrap();
    let expected = Message::room_chat("alice", "g", "hi");
    assert_eq!(recv(&bob).await, expected);
    assert_eq!(recv(&alice).await, expected);

    let carol = server.login("carol").await;
    alice
        .send(&Message::direct_chat("alice", "carol", "secret"))
        .await
        .unwrap();
    alice
        .send(&Message::direct_chat("alice", "bob", "marker"))
        .await
        .unwrap();
    assert_eq!(
        recv(&carol).await,
        Message::direct_chat("alice", "carol", "secret")
    );
    // The marker is the first thing bob sees after the room chat
    assert_eq!(
        recv(&bob).await,
        Message::direct_chat("alice", "bob", "marker")
    );

    alice.close().await;
    recv_until(&bob, &Message::room_notice("g", "alice disconnected")).await;

    // DMs to a departed user go nowhere
    bob.send(&Message::direct_chat("bob", "alice", "still there?"))
        .await
        .unwrap();
    bob.send(&Message::direct_chat("bob", "carol", "after"))
        .await
        .unwrap();
    assert_eq!(
        recv(&carol).await,
        Message::direct_chat("bob", "carol", "after")
    );

    let snapshot = server.registry.snapshot().await.unwrap();
    assert_eq!(snapshot.usernames, vec!["bob", "carol"]);
    assert_eq!(snapshot.rooms.get("g").unwrap(), &vec!["bob".to_string()]);
}

#[tokio::test]
async fn test_leave_notifies_room_and_deletes_empty_room() {
    let server = TestServer::start().await;

    let alice = server.login("alice").await;
    join(&alice, "alice", "g").await;
    let bob = server.login("bob").await;
    join(&bob, "bob", "g").await;

    bob.send(&Message::RoomLeave {
        username: "bob".into(),
        room: "g".into(),
    })
    .await
    .unwrap();
    recv_until(&alice, &Message::room_notice("g", "bob left the room")).await;
    recv_until(&bob, &Message::room_notice("g", "You left the room")).await;

    alice
        .send(&Message::RoomLeave {
            username: "alice".into(),
            room: "g".into(),
        })
        .await
        .unwrap();
    recv_until(&alice, &Message::room_notice("g", "You left the room")).await;

    let snapshot = server.registry.snapshot().await.unwrap();
    assert!(snapshot.rooms.is_empty());
}

#[tokio::test]
async fn test_duplicate_username_is_rejected() {
    let server = TestServer::start().await;
    let _alice = server.login("alice").await;

    let imposter = server.connect().await;
    imposter
        .send(&Message::Registration {
            username: "alice".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        recv(&imposter).await,
        Message::from(&ChatError::DuplicateOrEmptyUsername)
    );
    expect_closed(&imposter).await;

    let snapshot = server.registry.snapshot().await.unwrap();
    assert_eq!(snapshot.usernames, vec!["alice"]);
}

#[tokio::test]
async fn test_empty_username_is_rejected() {
    let server = TestServer::start().await;

    let conn = server.connect().await;
    conn.send(&Message::Registration {
        username: String::new(),
    })
    .await
    .unwrap();
    assert_eq!(recv(&conn).await, Message::notice("Username cannot be empty"));
    expect_closed(&conn).await;
}

#[tokio::test]
async fn test_first_frame_must_be_registration() {
    let server = TestServer::start().await;

    let conn = server.connect().await;
    conn.send(&Message::RoomJoin {
        username: "alice".into(),
        room: "g".into(),
    })
    .await
    .unwrap();
    assert_eq!(recv(&conn).await, Message::notice("You must register first"));
    expect_closed(&conn).await;
}

#[tokio::test]
async fn test_room_chat_requires_membership() {
    let server = TestServer::start().await;
    let alice = server.login("alice").await;

    alice
        .send(&Message::room_chat("alice", "x", "anyone?"))
        .await
        .unwrap();
    assert_eq!(
        recv(&alice).await,
        Message::from(&ChatError::NotInRoom("x".into()))
    );

    // Empty room name is reported but the session continues
    alice
        .send(&Message::RoomJoin {
            username: "alice".into(),
            room: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(recv(&alice).await, Message::from(&ChatError::EmptyRoomName));

    alice
        .send(&Message::Registration {
            username: "alice".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        recv(&alice).await,
        Message::notice("Already registered as alice")
    );
}

#[tokio::test]
async fn test_zero_length_frame_ends_session() {
    let server = TestServer::start().await;
    let bob = server.login("bob").await;
    join(&bob, "bob", "g").await;

    let mut raw = TcpStream::connect(server.addr).await.unwrap();
    write_frame(
        &mut raw,
        &Message::Registration {
            username: "alice".into(),
        },
    )
    .await
    .unwrap();
    write_frame(
        &mut raw,
        &Message::RoomJoin {
            username: "alice".into(),
            room: "g".into(),
        },
    )
    .await
    .unwrap();
    recv_until(&bob, &Message::room_notice("g", "alice joined the room")).await;

    raw.write_all(&[0u8; 8]).await.unwrap();
    recv_until(&bob, &Message::room_notice("g", "alice disconnected")).await;

    // Whatever was queued is flushed, then the server closes its side
    loop {
        match read_frame(&mut raw, None).await {
            Ok(_) => continue,
            Err(e) => {
                assert!(matches!(
                    e,
                    ChatError::ConnectionClosed | ChatError::ConnectionIo(_)
                ));
                break;
            }
        }
    }

    let snapshot = server.registry.snapshot().await.unwrap();
    assert_eq!(snapshot.usernames, vec!["bob"]);
}

#[tokio::test]
async fn test_unknown_message_closes_only_that_session() {
    let server = TestServer::start().await;
    let alice = server.login("alice").await;
    let bob = server.login("bob").await;

    let mut raw = TcpStream::connect(server.addr).await.unwrap();
    write_frame(
        &mut raw,
        &Message::Registration {
            username: "eve".into(),
        },
    )
    .await
    .unwrap();
    let body = br#"{"type":"typing","username":"eve"}"#;
    raw.write_all(&(body.len() as u64).to_le_bytes()).await.unwrap();
    raw.write_all(body).await.unwrap();

    loop {
        if read_frame(&mut raw, None).await.is_err() {
            break;
        }
    }

    alice
        .send(&Message::direct_chat("alice", "bob", "still up"))
        .await
        .unwrap();
    assert_eq!(
        recv(&bob).await,
        Message::direct_chat("alice", "bob", "still up")
    );
}
