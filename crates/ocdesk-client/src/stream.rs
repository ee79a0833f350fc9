//! Long-lived subscription to the server's `/event` feed.
//!
//! [`StreamClient::subscribe`] spawns one supervisor task that dials, reads
//! `data:` lines, decodes each into an [`Envelope`] and pushes it onto a
//! bounded channel. Any network or protocol failure is treated as a
//! disconnect: the task waits per its [`BackoffPolicy`] and dials again,
//! forever, until the caller's context or [`StreamClient::stop`] cancels it or
//! the receiving side is dropped.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use ocdesk_observability::{emit_event, ObservabilityEvent, ProcessKind};
use ocdesk_types::Envelope;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONNECTION};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::backoff::BackoffPolicy;
use crate::error::{ClientError, Result};
use crate::sse;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COMPONENT: &str = "event_stream";

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub base_url: String,
    pub backoff: BackoffPolicy,
    pub channel_capacity: usize,
    pub connect_timeout: Duration,
    /// Tags observability events with the hosting process.
    pub process: ProcessKind,
}

impl StreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            backoff: BackoffPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            process: ProcessKind::Desktop,
        }
    }

    pub fn event_url(&self) -> String {
        format!("{}/event", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    /// Terminal.
    Stopped,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Stopped => "stopped",
        }
    }
}

/// Either the subscriber's context or the client's own stop token.
#[derive(Debug, Clone)]
struct Shutdown {
    parent: CancellationToken,
    stop: CancellationToken,
}

impl Shutdown {
    fn is_triggered(&self) -> bool {
        self.parent.is_cancelled() || self.stop.is_cancelled()
    }

    async fn triggered(&self) {
        tokio::select! {
            _ = self.parent.cancelled() => {}
            _ = self.stop.cancelled() => {}
        }
    }
}

/// Receiving half of a subscription. Yields envelopes in arrival order and
/// `None` once the loop has exited or been cancelled.
#[derive(Debug)]
pub struct EventSubscription {
    rx: mpsc::Receiver<Envelope>,
    shutdown: Shutdown,
    state: watch::Receiver<ConnectionState>,
}

impl EventSubscription {
    pub async fn recv(&mut self) -> Option<Envelope> {
        if self.shutdown.is_triggered() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.triggered() => None,
            envelope = self.rx.recv() => envelope,
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn into_stream(self) -> impl Stream<Item = Envelope> {
        futures::stream::unfold(self, |mut sub| async move {
            let envelope = sub.recv().await?;
            Some((envelope, sub))
        })
    }
}

struct StreamClientState {
    subscribed: bool,
    task: Option<JoinHandle<()>>,
}

pub struct StreamClient {
    config: StreamConfig,
    http: Client,
    stop: CancellationToken,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    inner: Mutex<StreamClientState>,
}

impl StreamClient {
    pub fn new(config: StreamConfig) -> Result<Self> {
        reqwest::Url::parse(&config.base_url).map_err(|e| {
            ClientError::InvalidConfig(format!("invalid server URL {:?}: {}", config.base_url, e))
        })?;
        if config.channel_capacity == 0 {
            return Err(ClientError::InvalidConfig(
                "event channel capacity must be at least 1".to_string(),
            ));
        }

        let http = Client::builder()
            .http1_only()
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(config.connect_timeout)
            .build()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            config,
            http,
            stop: CancellationToken::new(),
            state_tx: Arc::new(state_tx),
            inner: Mutex::new(StreamClientState {
                subscribed: false,
                task: None,
            }),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Starts the supervisor loop. Only the first call succeeds; the stream
    /// has exactly one consumer.
    pub async fn subscribe(&self, ctx: CancellationToken) -> Result<EventSubscription> {
        let mut inner = self.inner.lock().await;
        if inner.subscribed {
            return Err(ClientError::AlreadySubscribed);
        }
        inner.subscribed = true;

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let shutdown = Shutdown {
            parent: ctx,
            stop: self.stop.clone(),
        };
        let stream_loop = StreamLoop {
            http: self.http.clone(),
            url: self.config.event_url(),
            backoff: self.config.backoff.clone(),
            process: self.config.process,
            shutdown: shutdown.clone(),
            state: self.state_tx.clone(),
        };
        tracing::info!("Subscribing to server events at {}", stream_loop.url);
        inner.task = Some(tokio::spawn(stream_loop.run(tx)));

        Ok(EventSubscription {
            rx,
            shutdown,
            state: self.state_tx.subscribe(),
        })
    }

    /// Cancels the loop. Safe to call any number of times.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            tracing::info!("Stopping server event stream");
        }
        self.stop.cancel();
    }

    /// [`stop`](Self::stop), then waits for the loop task to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.inner.lock().await.task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Event stream task ended abnormally: {}", e);
            }
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

enum PumpEnd {
    Eof,
    Shutdown,
    ConsumerGone,
}

struct StreamLoop {
    http: Client,
    url: String,
    backoff: BackoffPolicy,
    process: ProcessKind,
    shutdown: Shutdown,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl StreamLoop {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    async fn run(self, tx: mpsc::Sender<Envelope>) {
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_triggered() || tx.is_closed() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = self.shutdown.triggered() => break,
                _ = tx.closed() => {
                    tracing::info!("Event consumer went away; stopping stream");
                    break;
                }
                res = self.connect() => res,
            };

            let (code, reason) = match connected {
                Ok(response) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Streaming);
                    emit_event(
                        Level::INFO,
                        self.process,
                        ObservabilityEvent::new(COMPONENT, "stream.connected").url(&self.url),
                    );
                    match self.pump(response, &tx).await {
                        PumpEnd::Eof => ("STREAM_EOF", "stream ended".to_string()),
                        PumpEnd::Shutdown => break,
                        PumpEnd::ConsumerGone => {
                            tracing::info!("Event consumer went away; stopping stream");
                            break;
                        }
                    }
                }
                Err(e) => ("STREAM_CONNECT_FAILED", e.to_string()),
            };

            self.set_state(ConnectionState::Disconnected);
            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            emit_event(
                Level::WARN,
                self.process,
                ObservabilityEvent::new(COMPONENT, "stream.disconnected")
                    .url(&self.url)
                    .attempt(attempt)
                    .error_code(code)
                    .detail(&reason),
            );
            tracing::warn!("Event stream disconnected ({}); reconnecting in {:?}", reason, delay);

            tokio::select! {
                biased;
                _ = self.shutdown.triggered() => break,
                _ = tx.closed() => {
                    tracing::info!("Event consumer went away; stopping stream");
                    break;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Stopped);
        emit_event(
            Level::INFO,
            self.process,
            ObservabilityEvent::new(COMPONENT, "stream.stopped").url(&self.url),
        );
        // `tx` drops here, closing the channel.
    }

    async fn connect(&self) -> Result<reqwest::Response> {
        tracing::debug!("Connecting to {}", self.url);
        let response = self
            .http
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn pump(&self, response: reqwest::Response, tx: &mpsc::Sender<Envelope>) -> PumpEnd {
        let lines = sse::data_lines(response.bytes_stream());
        futures::pin_mut!(lines);
        let mut delivered: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.triggered() => return PumpEnd::Shutdown,
                _ = tx.closed() => return PumpEnd::ConsumerGone,
                next = lines.next() => next,
            };
            let Some(payload) = next else {
                tracing::debug!("Event stream closed after {} events", delivered);
                return PumpEnd::Eof;
            };

            let envelope = match Envelope::decode(&payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(
                        "Dropping malformed event: {} - data: {}",
                        e,
                        payload.chars().take(200).collect::<String>()
                    );
                    continue;
                }
            };
            tracing::trace!(event_type = %envelope.event_type, "server event");

            tokio::select! {
                biased;
                _ = self.shutdown.triggered() => return PumpEnd::Shutdown,
                sent = tx.send(envelope) => {
                    if sent.is_err() {
                        return PumpEnd::ConsumerGone;
                    }
                    delivered += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn spawn_event_server(
        status: &'static str,
        body: &'static str,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let _ = req_tx.send(String::from_utf8_lossy(&buf[..n]).into_owned());
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body.as_bytes()).await;
                if status.starts_with('2') {
                    held.push(socket);
                } else {
                    let _ = socket.shutdown().await;
                }
            }
        });
        (format!("http://{}", addr), req_rx)
    }

    fn fast_config(base_url: String) -> StreamConfig {
        StreamConfig {
            backoff: BackoffPolicy::Fixed(Duration::from_millis(20)),
            ..StreamConfig::new(base_url)
        }
    }

    async fn wait_for(state: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
        timeout(WAIT, state.wait_for(|s| *s == want))
            .await
            .expect("state change in time")
            .expect("state sender alive");
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(
            StreamClient::new(StreamConfig::new("not a url")),
            Err(ClientError::InvalidConfig(_))
        ));
        let zero = StreamConfig {
            channel_capacity: 0,
            ..StreamConfig::new("http://localhost:23450")
        };
        assert!(matches!(StreamClient::new(zero), Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn event_url_tolerates_trailing_slash() {
        assert_eq!(
            StreamConfig::new("http://localhost:23450/").event_url(),
            "http://localhost:23450/event"
        );
    }

    #[tokio::test]
    async fn second_subscribe_is_rejected() {
        let (url, _requests) = spawn_event_server("200 OK", "").await;
        let client = StreamClient::new(fast_config(url)).unwrap();
        let _sub = client.subscribe(CancellationToken::new()).await.unwrap();
        let err = client.subscribe(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::AlreadySubscribed));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn sends_event_stream_headers_and_delivers_envelopes() {
        let (url, mut requests) = spawn_event_server(
            "200 OK",
            "data: {\"type\":\"server.connected\",\"properties\":{}}\n\n",
        )
        .await;
        let client = StreamClient::new(fast_config(url)).unwrap();
        let mut sub = client.subscribe(CancellationToken::new()).await.unwrap();

        let envelope = timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(envelope.event_type, "server.connected");

        let request = requests.recv().await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /event "));
        assert!(request.contains("accept: text/event-stream"));
        assert!(request.contains("cache-control: no-cache"));
        client.shutdown().await;
    }

    #[tokio::test]
    async fn non_success_status_is_retried() {
        let (url, mut requests) = spawn_event_server("503 Service Unavailable", "busy").await;
        let client = StreamClient::new(fast_config(url)).unwrap();
        let _sub = client.subscribe(CancellationToken::new()).await.unwrap();

        for _ in 0..3 {
            timeout(WAIT, requests.recv()).await.unwrap().unwrap();
        }
        client.shutdown().await;
        assert_eq!(client.current_state(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_ends_recv() {
        let (url, _requests) = spawn_event_server("200 OK", "").await;
        let client = StreamClient::new(fast_config(url)).unwrap();
        let mut sub = client.subscribe(CancellationToken::new()).await.unwrap();
        let mut state = sub.state();
        wait_for(&mut state, ConnectionState::Streaming).await;

        client.stop();
        client.stop();
        assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
        client.shutdown().await;
        client.shutdown().await;
        assert_eq!(*state.borrow(), ConnectionState::Stopped);
    }

    #[tokio::test]
    async fn parent_cancellation_stops_the_loop() {
        let (url, _requests) = spawn_event_server("200 OK", "").await;
        let client = StreamClient::new(fast_config(url)).unwrap();
        let ctx = CancellationToken::new();
        let mut sub = client.subscribe(ctx.clone()).await.unwrap();
        let mut state = sub.state();

        ctx.cancel();
        assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());
        wait_for(&mut state, ConnectionState::Stopped).await;
    }

    #[tokio::test]
    async fn dropping_the_subscription_stops_an_idle_stream() {
        let (url, _requests) = spawn_event_server("200 OK", "").await;
        let client = StreamClient::new(fast_config(url)).unwrap();
        let sub = client.subscribe(CancellationToken::new()).await.unwrap();
        let mut state = client.state();
        wait_for(&mut state, ConnectionState::Streaming).await;

        drop(sub);
        wait_for(&mut state, ConnectionState::Stopped).await;
    }

    #[tokio::test]
    async fn dropping_the_subscription_during_backoff_stops_the_loop() {
        let (url, mut requests) = spawn_event_server("503 Service Unavailable", "busy").await;
        let config = StreamConfig {
            backoff: BackoffPolicy::Fixed(Duration::from_secs(60)),
            ..StreamConfig::new(url)
        };
        let client = StreamClient::new(config).unwrap();
        let sub = client.subscribe(CancellationToken::new()).await.unwrap();
        let mut state = client.state();
        timeout(WAIT, requests.recv()).await.unwrap().unwrap();
        wait_for(&mut state, ConnectionState::Disconnected).await;

        drop(sub);
        wait_for(&mut state, ConnectionState::Stopped).await;
    }

    #[tokio::test]
    async fn dropping_the_subscription_stops_the_loop() {
        let (url, _requests) = spawn_event_server(
            "200 OK",
            "data: {\"type\":\"a\"}\n\ndata: {\"type\":\"b\"}\n\n",
        )
        .await;
        let config = StreamConfig {
            channel_capacity: 1,
            ..fast_config(url)
        };
        let client = StreamClient::new(config).unwrap();
        let sub = client.subscribe(CancellationToken::new()).await.unwrap();
        let mut state = client.state();
        drop(sub);
        wait_for(&mut state, ConnectionState::Stopped).await;
    }
}
