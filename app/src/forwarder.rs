//! Republishes stream envelopes to whatever hosts the UI.

use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use ocdesk_client::{ConnectionState, EventSubscription};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

/// Every envelope is published under this name, payload unchanged.
pub const SERVER_EVENT: &str = "server-event";
/// Connection state changes, payload `{"state": "..."}`.
pub const STREAM_STATE_EVENT: &str = "server-stream-state";

const STOP_GRACE: Duration = Duration::from_secs(2);

/// Destination for named UI notifications.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: &Value) -> Result<()>;
}

#[derive(Serialize)]
struct JsonLine<'a> {
    event: &'a str,
    payload: &'a Value,
}

/// Writes one `{"event": ..., "payload": ...}` object per line.
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: &str, payload: &Value) -> Result<()> {
        let line = serde_json::to_string(&JsonLine { event, payload })?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| AppError::Sink("output writer poisoned".to_string()))?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

/// Hands notifications to an in-process consumer.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(String, Value)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &str, payload: &Value) -> Result<()> {
        self.tx
            .send((event.to_string(), payload.clone()))
            .map_err(|_| AppError::Sink("receiver dropped".to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded: u64,
    pub state_changes: u64,
    pub sink_errors: u64,
}

fn publish(sink: &dyn EventSink, event: &str, payload: &Value, stats: &mut ForwardStats) -> bool {
    match sink.emit(event, payload) {
        Ok(()) => true,
        Err(e) => {
            stats.sink_errors += 1;
            tracing::warn!("Failed to publish {}: {}", event, e);
            false
        }
    }
}

fn state_payload(state: ConnectionState) -> Value {
    json!({ "state": state.as_str() })
}

/// Drains `subscription` into `sink` until the channel closes or `ctx` is
/// cancelled. Sink failures are logged and counted, never fatal.
pub async fn run_forwarder(
    mut subscription: EventSubscription,
    sink: &dyn EventSink,
    ctx: CancellationToken,
) -> ForwardStats {
    let mut stats = ForwardStats::default();
    let mut state_rx = subscription.state();
    let mut state_open = true;
    let mut last_state = *state_rx.borrow_and_update();
    let mut stream_closed = false;
    if publish(sink, STREAM_STATE_EVENT, &state_payload(last_state), &mut stats) {
        stats.state_changes += 1;
    }

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break,
            changed = state_rx.changed(), if state_open => {
                if changed.is_err() {
                    state_open = false;
                    continue;
                }
                let state = *state_rx.borrow_and_update();
                if state != last_state {
                    last_state = state;
                    if publish(sink, STREAM_STATE_EVENT, &state_payload(state), &mut stats) {
                        stats.state_changes += 1;
                    }
                }
            }
            envelope = subscription.recv() => {
                let Some(envelope) = envelope else {
                    stream_closed = true;
                    break;
                };
                let payload = match serde_json::to_value(&envelope) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!("Failed to encode {} envelope: {}", envelope.event_type, e);
                        continue;
                    }
                };
                if publish(sink, SERVER_EVENT, &payload, &mut stats) {
                    stats.forwarded += 1;
                }
            }
        }
    }

    // A closed subscription means the loop is exiting; report where it lands.
    if stream_closed && state_open {
        let _ = tokio::time::timeout(
            STOP_GRACE,
            state_rx.wait_for(|s| *s == ConnectionState::Stopped),
        )
        .await;
    }
    let state = *state_rx.borrow();
    if state != last_state
        && publish(sink, STREAM_STATE_EVENT, &state_payload(state), &mut stats)
    {
        stats.state_changes += 1;
    }

    tracing::info!(
        "Event forwarding finished: {} forwarded, {} sink errors",
        stats.forwarded,
        stats.sink_errors
    );
    stats
}
