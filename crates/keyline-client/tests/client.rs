//! Client driver against a live server on loopback.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

use keyline_client::{Client, ClientConfig, ClientEvent};
use keyline_common::Error;
use keyline_crypto::{SessionState, TerminateOutcome};
use keyline_server::{Admin, Server, ServerConfig};

const WAIT: Duration = Duration::from_secs(5);

async fn start_server(auth_enabled: bool) -> (Admin, String) {
    let mut config = ServerConfig::new("127.0.0.1:0".parse().unwrap(), 8);
    config.auth_enabled = auth_enabled;
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let admin = server.admin();
    tokio::spawn(server.run());
    (admin, addr)
}

async fn server_state(admin: &Admin, id: u64) -> Option<SessionState> {
    admin
        .list()
        .await
        .into_iter()
        .find(|row| row.id == id)
        .and_then(|row| row.state)
}

async fn wait_for_state(admin: &Admin, id: u64, state: SessionState) {
    for _ in 0..200 {
        if server_state(admin, id).await == Some(state) {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("connection {id} never reached {state}");
}

#[tokio::test]
async fn test_full_session_lifecycle() {
    let (admin, addr) = start_server(true).await;
    let mut client = Client::new(ClientConfig::new(addr));

    assert!(client.connect().await.unwrap());
    assert!(!client.connect().await.unwrap());
    assert_eq!(client.state(), SessionState::Unauthenticated);

    let derivation = client.handshake(None, None).await.unwrap();
    assert!((2_000..10_000).contains(&derivation.params.p()));
    assert_eq!(client.state(), SessionState::Established);
    assert_eq!(server_state(&admin, 1).await, Some(SessionState::Established));

    client.send("hello").await.unwrap();
    client.send("").await.unwrap();

    assert!(matches!(
        client.terminate().await.unwrap(),
        TerminateOutcome::Terminated(_)
    ));
    assert_eq!(client.state(), SessionState::Unauthenticated);
    wait_for_state(&admin, 1, SessionState::Unauthenticated).await;

    assert_eq!(
        client.terminate().await.unwrap(),
        TerminateOutcome::NoActiveSession
    );
    client.close().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_operations_require_connection_and_session() {
    let (_admin, addr) = start_server(true).await;
    let mut client = Client::new(ClientConfig::new(addr));

    assert!(matches!(
        client.handshake(None, None).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(client.send("x").await, Err(Error::NotConnected)));

    client.connect().await.unwrap();
    assert!(matches!(
        client.send("x").await,
        Err(Error::NoActiveSession)
    ));
}

#[tokio::test]
async fn test_supplied_parameters_are_used() {
    let (_admin, addr) = start_server(true).await;
    let mut client = Client::new(ClientConfig::new(addr));
    client.connect().await.unwrap();

    let derivation = client.handshake(Some(7919), Some(7)).await.unwrap();
    assert_eq!((derivation.params.p(), derivation.params.g()), (7919, 7));

    let derivation = client.handshake(Some(7907), None).await.unwrap();
    assert_eq!(derivation.params.p(), 7907);

    assert!(matches!(
        client.handshake(Some(3), Some(2)).await,
        Err(Error::KeyAgreement(_))
    ));
}

#[tokio::test]
async fn test_rehandshake_replaces_session() {
    let (admin, addr) = start_server(true).await;
    let mut client = Client::new(ClientConfig::new(addr));
    client.connect().await.unwrap();

    let first = client.handshake(None, None).await.unwrap();
    let second = client.handshake(None, None).await.unwrap();
    assert_ne!(
        (first.client_public, first.server_public, first.params),
        (second.client_public, second.server_public, second.params)
    );
    client.send("after rekey").await.unwrap();
    assert_eq!(server_state(&admin, 1).await, Some(SessionState::Established));
}

#[tokio::test]
async fn test_server_end_session_is_applied() {
    let (admin, addr) = start_server(true).await;
    let mut client = Client::new(ClientConfig::new(addr));
    client.connect().await.unwrap();
    client.handshake(None, None).await.unwrap();

    admin.terminate(1).await.unwrap();
    let event = timeout(WAIT, client.next_event()).await.unwrap();
    assert_eq!(event, ClientEvent::SessionEnded);
    assert_eq!(client.state(), SessionState::Unauthenticated);
    assert!(matches!(
        client.send("x").await,
        Err(Error::NoActiveSession)
    ));

    client.handshake(None, None).await.unwrap();
    client.send("back again").await.unwrap();
}

#[tokio::test]
async fn test_kick_is_reported_as_disconnect() {
    let (admin, addr) = start_server(true).await;
    let mut client = Client::new(ClientConfig::new(addr));
    client.connect().await.unwrap();
    client.handshake(None, None).await.unwrap();

    admin.kick(1).await.unwrap();
    let event = timeout(WAIT, client.next_event()).await.unwrap();
    assert_eq!(event, ClientEvent::Disconnected(None));
    assert!(!client.is_connected());
    assert_eq!(client.state(), SessionState::Unauthenticated);

    // Reconnecting yields a fresh connection id.
    client.connect().await.unwrap();
    client.handshake(None, None).await.unwrap();
    assert_eq!(server_state(&admin, 2).await, Some(SessionState::Established));
}

#[tokio::test]
async fn test_without_mac() {
    let (admin, addr) = start_server(false).await;
    let mut config = ClientConfig::new(addr);
    config.auth_enabled = false;
    let mut client = Client::new(config);

    client.connect().await.unwrap();
    client.handshake(None, None).await.unwrap();
    client.send("unauthenticated text").await.unwrap();

    admin.terminate(1).await.unwrap();
    let event = timeout(WAIT, client.next_event()).await.unwrap();
    assert_eq!(event, ClientEvent::SessionEnded);
}

#[tokio::test]
async fn test_handshake_times_out_on_silent_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let silent = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        sleep(Duration::from_secs(30)).await;
        drop(stream);
    });

    let mut config = ClientConfig::new(addr);
    config.handshake_timeout = Duration::from_millis(200);
    let mut client = Client::new(config);
    client.connect().await.unwrap();

    assert!(matches!(
        client.handshake(None, None).await,
        Err(Error::Timeout(_))
    ));
    silent.abort();
}

#[tokio::test]
async fn test_client_key_log() {
    let dir = std::env::temp_dir().join(format!("keyline-client-keylog-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);

    let (_admin, addr) = start_server(true).await;
    let mut config = ClientConfig::new(addr);
    config.keylog_dir = Some(dir.clone());
    let mut client = Client::new(config);
    client.connect().await.unwrap();
    let derivation = client.handshake(None, None).await.unwrap();

    let contents = std::fs::read_to_string(dir.join("client.log")).unwrap();
    assert!(contents.contains(&format!(
        "enc_key_hex={}",
        hex_of(derivation.keys.enc_key())
    )));

    std::fs::remove_dir_all(&dir).unwrap();
}

fn hex_of(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
