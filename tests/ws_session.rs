use axum::extract::ws::Message;
use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use marquee::notify::{Hub, HubConfig, HubHandle, serve_listener};
use tokio::task::JoinHandle;

type Inbound = mpsc::UnboundedSender<Result<Message, String>>;
type Outbound = mpsc::UnboundedReceiver<Message>;

fn connect(hub: &HubHandle) -> (Inbound, Outbound, JoinHandle<()>) {
    let (client_tx, server_rx) = mpsc::unbounded();
    let (server_tx, client_rx) = mpsc::unbounded();
    let session = tokio::spawn(serve_listener(hub.clone(), server_rx, server_tx));
    (client_tx, client_rx, session)
}

async fn wait_for_listeners(hub: &HubHandle, expected: usize) {
    for _ in 0..1_000 {
        if hub.snapshot().listeners == expected {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!(
        "hub never reached {expected} listeners, has {}",
        hub.snapshot().listeners
    );
}

fn text_of(frame: Option<Message>) -> String {
    match frame {
        Some(Message::Text(text)) => text.as_str().to_string(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn client_frames_are_rebroadcast_to_everyone() {
    let hub = Hub::spawn(HubConfig::default());
    let mut observer = hub.register().await;
    let (client_tx, mut client_rx, session) = connect(&hub);

    client_tx
        .unbounded_send(Ok(Message::Text("hello".into())))
        .expect("session reading");

    assert_eq!(observer.recv().await, Some(Bytes::from_static(b"hello")));
    assert_eq!(text_of(client_rx.next().await), "hello");

    drop(client_tx);
    session.await.expect("session task");

    assert!(client_rx.next().await.is_none());
    wait_for_listeners(&hub, 1).await;
}

#[tokio::test]
async fn hub_broadcasts_reach_the_socket() {
    let hub = Hub::spawn(HubConfig::default());
    let (client_tx, mut client_rx, session) = connect(&hub);
    wait_for_listeners(&hub, 1).await;

    hub.broadcast(Bytes::from_static(br#"{"type":"movie"}"#)).await;
    hub.broadcast(Bytes::from_static(&[0xff, 0x00])).await;

    assert_eq!(text_of(client_rx.next().await), r#"{"type":"movie"}"#);
    match client_rx.next().await {
        Some(Message::Binary(data)) => assert_eq!(&data[..], &[0xff, 0x00]),
        other => panic!("expected binary frame, got {other:?}"),
    }

    client_tx
        .unbounded_send(Ok(Message::Close(None)))
        .expect("session reading");
    session.await.expect("session task");
    wait_for_listeners(&hub, 0).await;
}

#[tokio::test]
async fn read_error_unregisters_listener() {
    let hub = Hub::spawn(HubConfig::default());
    let (client_tx, mut client_rx, session) = connect(&hub);
    wait_for_listeners(&hub, 1).await;

    client_tx
        .unbounded_send(Err("connection reset".to_string()))
        .expect("session reading");
    session.await.expect("session task");

    assert!(client_rx.next().await.is_none());
    wait_for_listeners(&hub, 0).await;
}

#[tokio::test]
async fn write_failure_ends_session() {
    let hub = Hub::spawn(HubConfig::default());
    let (_client_tx, client_rx, session) = connect(&hub);
    wait_for_listeners(&hub, 1).await;

    drop(client_rx);
    hub.broadcast(Bytes::from_static(b"lost")).await;

    session.await.expect("session task");
    wait_for_listeners(&hub, 0).await;
}
