use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder};
use reqwest_websocket::{Message, RequestBuilderExt, WebSocket};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::event::ServerEvent;
use crate::socketio::{
    ENGINE_IO_VERSION, EnginePacket, OpenHandshake, SocketPacket, decode_payload, encode_payload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    WebSocket,
    Polling,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::WebSocket => "websocket",
            Transport::Polling => "polling",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushChannelConfig {
    pub server: String,
    pub path: String,
    pub reconnection: bool,
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    pub reconnection_delay_max: Duration,
    pub randomization_factor: f64,
    pub timeout: Duration,
    pub transports: Vec<Transport>,
    pub upgrade: bool,
}

impl Default for PushChannelConfig {
    fn default() -> Self {
        PushChannelConfig {
            server: "http://localhost:8088".to_string(),
            path: "/socket.io/".to_string(),
            reconnection: true,
            reconnection_attempts: 10,
            reconnection_delay: Duration::from_millis(1000),
            reconnection_delay_max: Duration::from_millis(5000),
            randomization_factor: 0.5,
            timeout: Duration::from_millis(20000),
            transports: vec![Transport::WebSocket, Transport::Polling],
            upgrade: true,
        }
    }
}

impl PushChannelConfig {
    pub fn endpoint(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}{}", self.server.trim_end_matches('/'), path)
    }

    pub fn websocket_endpoint(&self) -> String {
        let endpoint = self.endpoint();
        if let Some(rest) = endpoint.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = endpoint.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            endpoint
        }
    }
}

/// Exponential reconnect delay with jitter, capped at the configured maximum.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    jitter: f64,
    attempts: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, jitter: f64) -> Self {
        Backoff {
            min,
            max,
            jitter: jitter.clamp(0.0, 1.0),
            attempts: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let roll = rand::rng().random::<f64>();
        self.delay_for_roll(roll)
    }

    fn delay_for_roll(&mut self, roll: f64) -> Duration {
        let base = self.min.as_millis() as f64 * 2f64.powi(self.attempts.min(31) as i32);
        self.attempts = self.attempts.saturating_add(1);
        let mut millis = base;
        if self.jitter > 0.0 {
            let deviation = (roll * self.jitter * base).floor();
            if ((roll * 10.0).floor() as u64) & 1 == 0 {
                millis -= deviation;
            } else {
                millis += deviation;
            }
        }
        let capped = millis.min(self.max.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ServerDisconnect,
    TransportClose,
    TransportError,
    PingTimeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ServerDisconnect => "io server disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::PingTimeout => "ping timeout",
        }
    }
}

struct PollingLink {
    http: Client,
    url: String,
    request_timeout: Duration,
    buffered: VecDeque<EnginePacket>,
}

enum Link {
    WebSocket(WebSocket),
    Polling(PollingLink),
}

impl Link {
    fn transport(&self) -> Transport {
        match self {
            Link::WebSocket(_) => Transport::WebSocket,
            Link::Polling(_) => Transport::Polling,
        }
    }

    async fn send(&mut self, packet: EnginePacket) -> anyhow::Result<()> {
        match self {
            Link::WebSocket(websocket) => {
                websocket.send(Message::Text(packet.encode())).await?;
            }
            Link::Polling(polling) => {
                polling
                    .http
                    .post(&polling.url)
                    .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
                    .body(encode_payload(&[packet]))
                    .timeout(polling.request_timeout)
                    .send()
                    .await?
                    .error_for_status()?;
            }
        }
        Ok(())
    }

    /// Next packet from the server; `None` once the link is closed.
    async fn recv(&mut self) -> anyhow::Result<Option<EnginePacket>> {
        match self {
            Link::WebSocket(websocket) => loop {
                match websocket.next().await {
                    None => return Ok(None),
                    Some(Err(err)) => return Err(err.into()),
                    Some(Ok(Message::Text(text))) => {
                        return Ok(Some(EnginePacket::decode(&text)?));
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        websocket.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close { code, reason })) => {
                        debug!(?code, %reason, "websocket closed by server");
                        return Ok(None);
                    }
                    Some(Ok(_)) => {}
                }
            },
            Link::Polling(polling) => loop {
                if let Some(packet) = polling.buffered.pop_front() {
                    return Ok(Some(packet));
                }
                let body = polling
                    .http
                    .get(&polling.url)
                    .timeout(polling.request_timeout)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                polling.buffered.extend(decode_payload(&body)?);
            },
        }
    }
}

struct Connection {
    link: Link,
    open: OpenHandshake,
}

/// One persistent push connection per session, reconnecting on its own.
pub struct PushChannelClient {
    config: PushChannelConfig,
    http: Client,
    tx: broadcast::Sender<Command>,
}

impl PushChannelClient {
    pub fn new(
        config: PushChannelConfig,
        tx: broadcast::Sender<Command>,
    ) -> Result<PushChannelClient, anyhow::Error> {
        let http = ClientBuilder::new()
            .connect_timeout(config.timeout)
            .build()?;
        Ok(PushChannelClient { config, http, tx })
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.tx.send(Command::Push(event));
    }

    /// Connects and keeps reconnecting until the attempt budget runs out or
    /// the server disconnects us on purpose.
    pub async fn run(&self) -> Result<(), anyhow::Error> {
        info!(endpoint = %self.config.endpoint(), "initialising push channel");
        let mut backoff = Backoff::new(
            self.config.reconnection_delay,
            self.config.reconnection_delay_max,
            self.config.randomization_factor,
        );
        let mut prefer_websocket = true;
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                if attempt > self.config.reconnection_attempts {
                    error!(attempts = self.config.reconnection_attempts, "giving up on push channel");
                    self.emit(ServerEvent::ReconnectFailed);
                    return Ok(());
                }
                let delay = backoff.next_delay();
                debug!(?delay, attempt, "waiting before reconnect");
                sleep(delay).await;
                info!(attempt, "reconnecting");
                self.emit(ServerEvent::ReconnectAttempt(attempt));
            }

            match self.connect(prefer_websocket).await {
                Ok(connection) => {
                    let transport = connection.link.transport();
                    info!(transport = transport.as_str(), sid = %connection.open.sid, "connected to push server");
                    if attempt > 0 {
                        self.emit(ServerEvent::Reconnect(attempt));
                    }
                    self.emit(ServerEvent::Connect);
                    backoff.reset();
                    if transport == Transport::Polling && !self.config.upgrade {
                        prefer_websocket = false;
                    }

                    let reason = self.pump(connection).await;
                    info!(reason = reason.as_str(), "push channel disconnected");
                    self.emit(ServerEvent::Disconnect(reason.as_str().to_string()));
                    if reason == DisconnectReason::ServerDisconnect || !self.config.reconnection {
                        return Ok(());
                    }
                    attempt = 1;
                }
                Err(err) => {
                    error!(error = %format!("{err:#}"), "push channel connect error");
                    self.emit(ServerEvent::ConnectError(format!("{err:#}")));
                    if !self.config.reconnection {
                        return Ok(());
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    fn transport_order(&self, prefer_websocket: bool) -> Vec<Transport> {
        let has_polling = self.config.transports.contains(&Transport::Polling);
        self.config
            .transports
            .iter()
            .copied()
            .filter(|transport| {
                prefer_websocket || *transport != Transport::WebSocket || !has_polling
            })
            .collect()
    }

    /// Tries each transport in turn; every one gets a full handshake window.
    async fn connect(&self, prefer_websocket: bool) -> anyhow::Result<Connection> {
        let mut last_error = None;
        for transport in self.transport_order(prefer_websocket) {
            let handshake = async {
                let connection = self.open_transport(transport).await?;
                self.join_namespace(connection).await
            };
            let outcome = timeout(self.config.timeout, handshake)
                .await
                .unwrap_or_else(|_| {
                    Err(anyhow!(
                        "{} handshake timed out after {:?}",
                        transport.as_str(),
                        self.config.timeout
                    ))
                });
            match outcome {
                Ok(connection) => return Ok(connection),
                Err(err) => {
                    warn!(transport = transport.as_str(), error = %format!("{err:#}"), "transport unavailable");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no transports configured")))
    }

    async fn open_transport(&self, transport: Transport) -> anyhow::Result<Connection> {
        match transport {
            Transport::WebSocket => {
                let url = format!(
                    "{}?{}",
                    self.config.websocket_endpoint(),
                    serde_urlencoded::to_string([
                        ("EIO", ENGINE_IO_VERSION),
                        ("transport", transport.as_str()),
                    ])?
                );
                let response = self
                    .http
                    .get(&url)
                    .upgrade()
                    .send()
                    .await
                    .with_context(|| format!("upgrading {url}"))?;
                let mut link = Link::WebSocket(response.into_websocket().await?);
                match link.recv().await? {
                    Some(EnginePacket::Open(open)) => Ok(Connection { link, open }),
                    Some(other) => bail!("expected open packet, got {other:?}"),
                    None => bail!("connection closed during handshake"),
                }
            }
            Transport::Polling => {
                let endpoint = self.config.endpoint();
                let handshake_url = format!(
                    "{endpoint}?{}",
                    serde_urlencoded::to_string([
                        ("EIO", ENGINE_IO_VERSION),
                        ("transport", transport.as_str()),
                    ])?
                );
                let body = self
                    .http
                    .get(&handshake_url)
                    .timeout(self.config.timeout)
                    .send()
                    .await
                    .with_context(|| format!("requesting {handshake_url}"))?
                    .error_for_status()?
                    .text()
                    .await?;
                let mut packets = VecDeque::from(decode_payload(&body)?);
                let open = match packets.pop_front() {
                    Some(EnginePacket::Open(open)) => open,
                    other => bail!("expected open packet, got {other:?}"),
                };
                let url = format!(
                    "{endpoint}?{}",
                    serde_urlencoded::to_string([
                        ("EIO", ENGINE_IO_VERSION),
                        ("transport", transport.as_str()),
                        ("sid", open.sid.as_str()),
                    ])?
                );
                let link = Link::Polling(PollingLink {
                    http: self.http.clone(),
                    url,
                    request_timeout: open.liveness_window() + self.config.timeout,
                    buffered: packets,
                });
                Ok(Connection { link, open })
            }
        }
    }

    async fn join_namespace(&self, mut connection: Connection) -> anyhow::Result<Connection> {
        connection
            .link
            .send(EnginePacket::Message(SocketPacket::Connect(None).encode()))
            .await?;
        loop {
            match connection.link.recv().await? {
                None => bail!("connection closed before namespace connect"),
                Some(EnginePacket::Ping(data)) => {
                    connection.link.send(EnginePacket::Pong(data)).await?;
                }
                Some(EnginePacket::Close) => bail!("server closed during handshake"),
                Some(EnginePacket::Message(text)) => match SocketPacket::decode(&text)? {
                    SocketPacket::Connect(_) => return Ok(connection),
                    SocketPacket::ConnectError(data) => bail!(SocketPacket::error_message(&data)),
                    other => debug!(?other, "ignoring packet before namespace connect"),
                },
                Some(_) => {}
            }
        }
    }

    async fn pump(&self, mut connection: Connection) -> DisconnectReason {
        let window = connection.open.liveness_window();
        loop {
            let packet = match timeout(window, connection.link.recv()).await {
                Err(_) => return DisconnectReason::PingTimeout,
                Ok(Err(err)) => {
                    warn!(error = %format!("{err:#}"), "push transport error");
                    return DisconnectReason::TransportError;
                }
                Ok(Ok(None)) => return DisconnectReason::TransportClose,
                Ok(Ok(Some(packet))) => packet,
            };
            match packet {
                EnginePacket::Ping(data) => {
                    if let Err(err) = connection.link.send(EnginePacket::Pong(data)).await {
                        warn!(error = %format!("{err:#}"), "failed to answer ping");
                        return DisconnectReason::TransportError;
                    }
                }
                EnginePacket::Close => return DisconnectReason::TransportClose,
                EnginePacket::Message(text) => match SocketPacket::decode(&text) {
                    Ok(SocketPacket::Event { name, data }) => self.dispatch(&name, data),
                    Ok(SocketPacket::Disconnect) => return DisconnectReason::ServerDisconnect,
                    Ok(other) => debug!(?other, "ignoring socket packet"),
                    Err(err) => warn!(error = %err, "undecodable socket packet"),
                },
                EnginePacket::Open(_)
                | EnginePacket::Pong(_)
                | EnginePacket::Upgrade
                | EnginePacket::Noop => {}
            }
        }
    }

    fn dispatch(&self, name: &str, data: serde_json::Value) {
        match ServerEvent::decode(name, data) {
            Ok(event) => {
                debug!(event = event.name(), "push event received");
                self.emit(event);
            }
            Err(err) => {
                warn!(error = %err, "dropping push event");
                let _ = self.tx.send(Command::Error(err.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(config: PushChannelConfig) -> (PushChannelClient, broadcast::Receiver<Command>) {
        let (tx, rx) = broadcast::channel(16);
        (PushChannelClient::new(config, tx).unwrap(), rx)
    }

    #[test]
    fn default_config_matches_dashboard_settings() {
        let config = PushChannelConfig::default();
        assert!(config.reconnection);
        assert_eq!(config.reconnection_attempts, 10);
        assert_eq!(config.reconnection_delay, Duration::from_millis(1000));
        assert_eq!(config.reconnection_delay_max, Duration::from_millis(5000));
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.transports, vec![Transport::WebSocket, Transport::Polling]);
        assert!(config.upgrade);
    }

    #[test]
    fn endpoints_follow_server_scheme() {
        let config = PushChannelConfig {
            server: "https://monitor.local:8443/".into(),
            path: "socket.io/".into(),
            ..Default::default()
        };
        assert_eq!(config.endpoint(), "https://monitor.local:8443/socket.io/");
        assert_eq!(config.websocket_endpoint(), "wss://monitor.local:8443/socket.io/");
        assert_eq!(
            PushChannelConfig::default().websocket_endpoint(),
            "ws://localhost:8088/socket.io/"
        );
    }

    #[test]
    fn backoff_grows_and_stays_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(5000), 0.5);
        // an even tenth digit subtracts the jitter
        assert_eq!(backoff.delay_for_roll(0.0), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for_roll(0.0), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for_roll(0.2), Duration::from_millis(3600));
        for _ in 0..40 {
            assert!(backoff.next_delay() <= Duration::from_millis(5000));
        }
        backoff.reset();
        assert_eq!(backoff.delay_for_roll(0.15), Duration::from_millis(1075));
    }

    #[test]
    fn jitter_never_exceeds_bounds() {
        let mut backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(5000), 0.5);
        for attempt in 0..12 {
            let delay = backoff.next_delay();
            let base = (1000f64 * 2f64.powi(attempt)).min(5000.0);
            assert!(delay.as_millis() as f64 >= (base * 0.5).floor().min(5000.0) - 1.0);
            assert!(delay <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn polling_only_reconnects_when_upgrade_is_off() {
        let (push, _rx) = client(PushChannelConfig::default());
        assert_eq!(
            push.transport_order(true),
            vec![Transport::WebSocket, Transport::Polling]
        );
        assert_eq!(push.transport_order(false), vec![Transport::Polling]);

        let (ws_only, _rx) = client(PushChannelConfig {
            transports: vec![Transport::WebSocket],
            ..Default::default()
        });
        assert_eq!(ws_only.transport_order(false), vec![Transport::WebSocket]);
    }

    #[test]
    fn unknown_events_surface_as_errors() {
        let (push, mut rx) = client(PushChannelConfig::default());
        push.dispatch("mystery", serde_json::json!({}));
        match rx.try_recv() {
            Ok(Command::Error(message)) => assert!(message.contains("mystery")),
            other => panic!("unexpected command: {other:?}"),
        }
        push.dispatch("status_update", serde_json::json!({"今日盈亏": 1}));
        assert!(matches!(
            rx.try_recv(),
            Ok(Command::Push(ServerEvent::StatusUpdate(_)))
        ));
    }

    #[tokio::test]
    async fn each_transport_gets_its_own_handshake_window() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        // accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        let window = Duration::from_millis(200);
        let (push, _rx) = client(PushChannelConfig {
            server: format!("http://{addr}"),
            timeout: window,
            ..Default::default()
        });
        let started = tokio::time::Instant::now();
        let err = match push.connect(true).await {
            Ok(_) => panic!("silent server should not complete a handshake"),
            Err(err) => err,
        };
        // the websocket attempt timed out first, then polling got its own window
        assert!(format!("{err:#}").contains("polling"), "{err:#}");
        assert!(started.elapsed() >= window * 2);
        assert!(accepted.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn exhausted_attempts_end_with_reconnect_failed() {
        let config = PushChannelConfig {
            // nothing listens on the discard port
            server: "http://127.0.0.1:9".into(),
            reconnection_attempts: 2,
            reconnection_delay: Duration::from_millis(1),
            reconnection_delay_max: Duration::from_millis(2),
            timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let (push, mut rx) = client(config);
        push.run().await.unwrap();

        let mut names = Vec::new();
        while let Ok(Command::Push(event)) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "connect_error",
                "reconnect_attempt",
                "connect_error",
                "reconnect_attempt",
                "connect_error",
                "reconnect_failed",
            ]
        );
    }
}
