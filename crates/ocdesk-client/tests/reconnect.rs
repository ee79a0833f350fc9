use std::time::Duration;

use ocdesk_client::{BackoffPolicy, ConnectionState, StreamClient, StreamConfig};
use ocdesk_types::Envelope;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_millis(150);

enum Reply {
    /// Write the body, then close the connection.
    Close(&'static str),
    /// Write the body and keep the connection open.
    Hold(&'static str),
}

/// Answers connections in order with the scripted replies. Connections past
/// the end of the script are accepted and left hanging. Each accepted
/// connection reports its arrival time.
async fn spawn_scripted_server(script: Vec<Reply>) -> (String, mpsc::UnboundedReceiver<Instant>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut held: Vec<TcpStream> = Vec::new();
        let mut script = script.into_iter();
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = conn_tx.send(Instant::now());
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let Some(reply) = script.next() else {
                held.push(socket);
                continue;
            };
            let head = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";
            let _ = socket.write_all(head.as_bytes()).await;
            match reply {
                Reply::Close(body) => {
                    let _ = socket.write_all(body.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
                Reply::Hold(body) => {
                    let _ = socket.write_all(body.as_bytes()).await;
                    held.push(socket);
                }
            }
        }
    });
    (format!("http://{}", addr), conn_rx)
}

fn message_id(envelope: &Envelope) -> Option<&str> {
    envelope.property("info")?.get("id")?.as_str()
}

fn client_for(url: String) -> StreamClient {
    let config = StreamConfig {
        backoff: BackoffPolicy::Fixed(RECONNECT_DELAY),
        ..StreamConfig::new(url)
    };
    StreamClient::new(config).expect("client")
}

#[tokio::test]
async fn survives_disconnect_and_delivers_across_reconnect() {
    let (url, mut connections) = spawn_scripted_server(vec![
        Reply::Close("data: {\"type\":\"message.updated\",\"properties\":{\"info\":{\"id\":\"m1\"}}}\n\n"),
        Reply::Hold("data: {\"type\":\"message.updated\",\"properties\":{\"info\":{\"id\":\"m2\"}}}\n\n"),
    ])
    .await;
    let client = client_for(url);
    let mut sub = client.subscribe(CancellationToken::new()).await.expect("subscribe");

    let first = timeout(WAIT, sub.recv()).await.expect("m1 in time").expect("m1");
    assert_eq!(message_id(&first), Some("m1"));

    let second = timeout(WAIT, sub.recv()).await.expect("m2 in time").expect("m2");
    assert_eq!(message_id(&second), Some("m2"));

    let first_dial = connections.recv().await.expect("first dial");
    let second_dial = connections.recv().await.expect("second dial");
    assert!(second_dial - first_dial >= RECONNECT_DELAY);
    assert_eq!(*sub.state().borrow(), ConnectionState::Streaming);

    client.stop();
    assert!(timeout(WAIT, sub.recv()).await.expect("recv after stop").is_none());
    client.shutdown().await;
    assert_eq!(client.current_state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn malformed_event_does_not_drop_its_neighbours() {
    let (url, mut connections) = spawn_scripted_server(vec![Reply::Hold(
        "data: {\"type\":\"a\"}\n\ndata: {not json\n\ndata: {\"properties\":{}}\n\ndata: {\"type\":\"c\"}\n\n",
    )])
    .await;
    let client = client_for(url);
    let mut sub = client.subscribe(CancellationToken::new()).await.expect("subscribe");

    let a = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    let c = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(a.event_type, "a");
    assert_eq!(c.event_type, "c");

    connections.recv().await.expect("one dial");
    assert!(connections.try_recv().is_err(), "malformed data must not force a reconnect");
    client.shutdown().await;
}

#[tokio::test]
async fn stop_during_backoff_closes_the_channel() {
    let (url, _connections) = spawn_scripted_server(vec![Reply::Close(
        "data: {\"type\":\"only\"}\n\n",
    )])
    .await;
    let config = StreamConfig {
        backoff: BackoffPolicy::Fixed(Duration::from_secs(60)),
        ..StreamConfig::new(url)
    };
    let client = StreamClient::new(config).expect("client");
    let mut sub = client.subscribe(CancellationToken::new()).await.expect("subscribe");
    let mut state = sub.state();

    assert_eq!(timeout(WAIT, sub.recv()).await.unwrap().unwrap().event_type, "only");
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .expect("disconnect observed")
        .expect("sender alive");

    let started = Instant::now();
    client.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(sub.recv().await.is_none());
    assert_eq!(*state.borrow(), ConnectionState::Stopped);
}
