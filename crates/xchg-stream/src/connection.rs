//! Persistent streaming connection.
//!
//! One `StreamConnection` is one attempt at a live push channel:
//! handshake, protocol-specific subscribe frames, then a dispatch loop
//! that hands every message to the owner's sink in arrival order. On
//! read failure or peer close the sink's `on_disconnect` is invoked
//! exactly once and the connection is finished — reconnection belongs
//! to the owning adapter, scheduled through its `SchedulerScope`. That
//! keeps the wire state machine free of scheduling policy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{StreamError, StreamResult};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection lifecycle state.
///
/// `ReconnectScheduled` is set by the owning adapter while a retry is
/// pending; the connection itself only moves through the first three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
}

/// Receives everything the connection produces.
///
/// `on_message` is awaited inline by the dispatch loop, so delivery
/// within one connection is strictly in arrival order.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_message(&self, received_at: DateTime<Utc>, payload: String);
    async fn on_disconnect(&self);
}

/// Stream connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// WebSocket URL.
    pub url: String,
    /// Handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// How often to probe the peer when the channel is quiet.
    pub heartbeat_interval_ms: u64,
    /// How long to wait for the probe answer before declaring the
    /// connection dead.
    pub heartbeat_timeout_ms: u64,
    /// Application-level ping frame, for venues that ignore transport
    /// pings. `None` sends a transport ping.
    pub ping_payload: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            ping_payload: None,
        }
    }
}

/// Cloneable handle for orderly shutdown of a running connection.
#[derive(Debug, Clone)]
pub struct StreamStopHandle {
    token: CancellationToken,
}

impl StreamStopHandle {
    pub fn stop(&self) {
        self.token.cancel();
    }
}

/// Ping/pong bookkeeping for the dispatch loop.
struct Heartbeat {
    interval_ms: u64,
    timeout_ms: u64,
    last_activity: RwLock<DateTime<Utc>>,
    ping_sent_at: RwLock<Option<DateTime<Utc>>>,
}

impl Heartbeat {
    fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            last_activity: RwLock::new(Utc::now()),
            ping_sent_at: RwLock::new(None),
        }
    }

    fn record_activity(&self) {
        *self.last_activity.write() = Utc::now();
    }

    fn record_ping(&self) {
        *self.ping_sent_at.write() = Some(Utc::now());
    }

    fn record_pong(&self) {
        *self.ping_sent_at.write() = None;
    }

    fn is_timed_out(&self) -> bool {
        match *self.ping_sent_at.read() {
            Some(sent) => (Utc::now() - sent).num_milliseconds() > self.timeout_ms as i64,
            None => false,
        }
    }

    fn should_ping(&self) -> bool {
        if self.ping_sent_at.read().is_some() {
            return false;
        }
        let idle_ms = (Utc::now() - *self.last_activity.read()).num_milliseconds();
        idle_ms >= self.interval_ms as i64
    }

    async fn wait_for_check(&self) {
        tokio::time::sleep(Duration::from_millis(self.interval_ms.max(2) / 2)).await;
    }
}

/// One persistent push channel to a venue.
pub struct StreamConnection {
    config: StreamConfig,
    state: Arc<RwLock<ConnectionState>>,
    heartbeat: Heartbeat,
    stop_token: CancellationToken,
    ws: Option<WsStream>,
}

impl StreamConnection {
    pub fn new(config: StreamConfig) -> Self {
        let heartbeat = Heartbeat::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            heartbeat,
            stop_token: CancellationToken::new(),
            ws: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Shared state cell, for the owning adapter to read (and to mark
    /// `ReconnectScheduled`) after the connection object is consumed.
    pub fn state_handle(&self) -> Arc<RwLock<ConnectionState>> {
        self.state.clone()
    }

    pub fn stop_handle(&self) -> StreamStopHandle {
        StreamStopHandle {
            token: self.stop_token.clone(),
        }
    }

    /// Perform the handshake. Fails with a connection error if the
    /// peer cannot be reached within the configured timeout.
    pub async fn connect(&mut self) -> StreamResult<()> {
        *self.state.write() = ConnectionState::Connecting;
        info!(url = %self.config.url, "connecting stream");

        let handshake = connect_async_tls_with_config(&self.config.url, None, true, None);
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);

        match tokio::time::timeout(timeout, handshake).await {
            Ok(Ok((ws, _response))) => {
                self.ws = Some(ws);
                *self.state.write() = ConnectionState::Connected;
                info!(url = %self.config.url, "stream connected");
                Ok(())
            }
            Ok(Err(e)) => {
                *self.state.write() = ConnectionState::Disconnected;
                Err(StreamError::ConnectionFailed(e.to_string()))
            }
            Err(_) => {
                *self.state.write() = ConnectionState::Disconnected;
                Err(StreamError::ConnectionFailed(format!(
                    "handshake timeout after {}ms",
                    self.config.connect_timeout_ms
                )))
            }
        }
    }

    /// Send subscribe frames, then dispatch messages until the peer
    /// goes away or `stop()` is called.
    ///
    /// Orderly shutdown returns `Ok(())` without touching the sink;
    /// any other exit invokes `sink.on_disconnect()` exactly once and
    /// returns the error that ended the loop.
    pub async fn start(
        mut self,
        subscriptions: Vec<String>,
        sink: Arc<dyn EventSink>,
    ) -> StreamResult<()> {
        let ws = self.ws.take().ok_or(StreamError::NotConnected)?;
        let (mut write, mut read) = ws.split();

        for frame in &subscriptions {
            write.send(Message::Text(frame.clone())).await?;
        }
        debug!(count = subscriptions.len(), "subscriptions sent");

        self.heartbeat.record_activity();

        let result = self.dispatch_loop(&mut write, &mut read, sink.as_ref()).await;

        *self.state.write() = ConnectionState::Disconnected;
        match result {
            LoopExit::Stopped => {
                let _ = write.send(Message::Close(None)).await;
                info!("stream stopped");
                Ok(())
            }
            LoopExit::Lost(err) => {
                warn!(error = %err, "stream lost");
                sink.on_disconnect().await;
                Err(err)
            }
        }
    }

    async fn dispatch_loop(
        &self,
        write: &mut futures_util::stream::SplitSink<WsStream, Message>,
        read: &mut futures_util::stream::SplitStream<WsStream>,
        sink: &dyn EventSink,
    ) -> LoopExit {
        loop {
            tokio::select! {
                () = self.stop_token.cancelled() => {
                    return LoopExit::Stopped;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.heartbeat.record_activity();
                            sink.on_message(Utc::now(), text).await;
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            // Venues that gzip payloads deliver binary
                            // frames; the codec upstream handles those.
                            self.heartbeat.record_activity();
                            match String::from_utf8(bytes) {
                                Ok(text) => sink.on_message(Utc::now(), text).await,
                                Err(_) => debug!("dropping non-utf8 binary frame"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return LoopExit::Lost(e.into());
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "closed by peer".to_string()));
                            return LoopExit::Lost(StreamError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "stream read error");
                            return LoopExit::Lost(e.into());
                        }
                        None => {
                            return LoopExit::Lost(StreamError::ConnectionClosed {
                                code: 1006,
                                reason: "stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        return LoopExit::Lost(StreamError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_ping() {
                        let probe = match &self.config.ping_payload {
                            Some(payload) => Message::Text(payload.clone()),
                            None => Message::Ping(Vec::new()),
                        };
                        if let Err(e) = write.send(probe).await {
                            return LoopExit::Lost(e.into());
                        }
                        self.heartbeat.record_ping();
                    }
                }
            }
        }
    }
}

enum LoopExit {
    Stopped,
    Lost(StreamError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.heartbeat_interval_ms, 30_000);
        assert!(config.ping_payload.is_none());
    }

    #[test]
    fn test_initial_state() {
        let conn = StreamConnection::new(StreamConfig::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_without_connect_fails() {
        let conn = StreamConnection::new(StreamConfig::default());
        let sink = Arc::new(NullSink);
        let result = conn.start(Vec::new(), sink).await;
        assert!(matches!(result, Err(StreamError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        // Nothing listens on this port.
        let mut conn = StreamConnection::new(StreamConfig {
            url: "ws://127.0.0.1:1/ws".to_string(),
            connect_timeout_ms: 500,
            ..Default::default()
        });
        let result = conn.connect().await;
        assert!(matches!(result, Err(StreamError::ConnectionFailed(_))));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_heartbeat_ping_pong() {
        let hb = Heartbeat::new(0, 10_000);
        assert!(!hb.is_timed_out());

        hb.record_ping();
        assert!(!hb.should_ping());

        hb.record_pong();
        assert!(!hb.is_timed_out());
        assert!(hb.should_ping());
    }

    struct NullSink;

    #[async_trait]
    impl EventSink for NullSink {
        async fn on_message(&self, _received_at: DateTime<Utc>, _payload: String) {}
        async fn on_disconnect(&self) {}
    }
}
