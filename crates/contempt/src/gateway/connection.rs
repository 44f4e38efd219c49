//! Gateway connection with heartbeats, resume and automatic reconnection.

use std::sync::Arc;
use std::time::Duration;

use contempt_proto::{Disguise, GatewayPacket, Hello, OpCode, ProtoError};
use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

use super::close::{CloseAction, CloseCodePolicy, CLIENT_CLOSE_CODE, ZOMBIE_CLOSE_CODE};
use super::heartbeat::{Beat, Heartbeat, HeartbeatConfig};
use super::reconnect::{Backoff, ReconnectConfig};
use super::session::SessionInfo;
use super::state::ConnectionState;
use super::transport::{Connector, Frame, Transport, WsConnector};
use crate::error::{ClientError, Result};
use crate::log_store::{Direction, LogStore};
use crate::observe::{Observable, Subscription};

const PACKET_CHANNEL_CAPACITY: usize = 1024;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Authentication token sent in identify and resume.
    pub token: String,
    /// Gateway protocol version.
    pub api_version: u8,
    /// Client identity.
    pub disguise: Disguise,
    /// Time allowed for the socket to open.
    pub connect_timeout: Duration,
    /// Time allowed between socket open and HELLO.
    pub hello_timeout: Duration,
    /// Time allowed for the close handshake.
    pub close_timeout: Duration,
    /// Heartbeat behavior.
    pub heartbeat: HeartbeatConfig,
    /// Bounds of the random wait before re-identifying after a
    /// non-resumable invalid session.
    pub invalid_session_delay: (Duration, Duration),
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
    /// Close code classification.
    pub close_codes: CloseCodePolicy,
}

impl GatewayConfig {
    /// Defaults with the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_version: crate::config::DEFAULT_API_VERSION,
            disguise: Disguise::default(),
            connect_timeout: Duration::from_secs(10),
            hello_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            heartbeat: HeartbeatConfig::default(),
            invalid_session_delay: (Duration::from_secs(1), Duration::from_secs(5)),
            reconnect: ReconnectConfig::default(),
            close_codes: CloseCodePolicy::default(),
        }
    }
}

/// The parts of READY the connection itself needs.
#[derive(Deserialize)]
struct ReadySession {
    session_id: String,
    #[serde(default)]
    resume_gateway_url: Option<String>,
}

/// State shared between the handle and the driver task.
struct Shared {
    state: Observable<ConnectionState>,
    session: Mutex<SessionInfo>,
    latency: Mutex<Option<Duration>>,
    packets: broadcast::Sender<GatewayPacket>,
    sent: broadcast::Sender<GatewayPacket>,
    ordered: Mutex<Option<mpsc::UnboundedSender<GatewayPacket>>>,
    ordered_rx: Mutex<Option<mpsc::UnboundedReceiver<GatewayPacket>>>,
    log: Option<Arc<LogStore>>,
}

impl Shared {
    fn new(log: Option<Arc<LogStore>>) -> Self {
        let (packets, _) = broadcast::channel(PACKET_CHANNEL_CAPACITY);
        let (sent, _) = broadcast::channel(PACKET_CHANNEL_CAPACITY);
        Self {
            state: Observable::new(ConnectionState::Idle),
            session: Mutex::new(SessionInfo::default()),
            latency: Mutex::new(None),
            packets,
            sent,
            ordered: Mutex::new(None),
            ordered_rx: Mutex::new(None),
            log,
        }
    }

    fn transition(&self, state: ConnectionState) {
        if self.state.set_if_changed(state) {
            debug!(%state, "gateway state changed");
        }
    }

    fn publish_received(&self, packet: &GatewayPacket) {
        if let Some(tx) = self.ordered.lock().as_ref() {
            let _ = tx.send(packet.clone());
        }
        let _ = self.packets.send(packet.clone());
        if let Some(log) = &self.log {
            log.record_gateway(Direction::Received, packet);
        }
    }

    fn publish_sent(&self, packet: &GatewayPacket) {
        let packet = redact_token(packet);
        let _ = self.sent.send(packet.clone());
        if let Some(log) = &self.log {
            log.record_gateway(Direction::Sent, &packet);
        }
    }

    /// Start a fresh ordered stream for the dispatcher.
    fn open_ordered(&self) {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.ordered.lock() = Some(tx);
        *self.ordered_rx.lock() = Some(rx);
    }

    /// End the ordered stream; the consumer sees it finish after draining.
    fn close_ordered(&self) {
        self.ordered.lock().take();
    }
}

/// Identify and resume carry the token; observers never see it.
fn redact_token(packet: &GatewayPacket) -> GatewayPacket {
    let mut packet = packet.clone();
    if matches!(packet.op, OpCode::Identify | OpCode::Resume) {
        if let Some(Value::Object(map)) = packet.d.as_mut() {
            map.insert("token".to_string(), Value::from("[redacted]"));
        }
    }
    packet
}

enum Command {
    Send(GatewayPacket, oneshot::Sender<Result<()>>),
    Disconnect(u16, oneshot::Sender<()>),
}

struct Driver {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// One authenticated gateway session, kept alive across socket failures.
///
/// `connect` opens the socket and waits for HELLO; a background task then
/// identifies or resumes, heartbeats, and reconnects with backoff until
/// [`disconnect`](Self::disconnect) is called or a terminal close arrives.
pub struct GatewayConnection<C: Connector = WsConnector> {
    config: GatewayConfig,
    connector: Arc<C>,
    shared: Arc<Shared>,
    driver: tokio::sync::Mutex<Option<Driver>>,
}

impl GatewayConnection<WsConnector> {
    /// Connection over real WebSockets.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_connector(config, WsConnector)
    }
}

impl<C: Connector> GatewayConnection<C> {
    /// Connection over a custom transport.
    #[must_use]
    pub fn with_connector(config: GatewayConfig, connector: C) -> Self {
        Self {
            config,
            connector: Arc::new(connector),
            shared: Arc::new(Shared::new(None)),
            driver: tokio::sync::Mutex::new(None),
        }
    }

    /// Record every packet in `log`.
    #[must_use]
    pub fn with_log_store(self, log: Arc<LogStore>) -> Self {
        Self {
            shared: Arc::new(Shared::new(Some(log))),
            ..self
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Watch state transitions, starting with the current state.
    #[must_use]
    pub fn subscribe_state(&self) -> Subscription<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Every packet received from now on.
    #[must_use]
    pub fn subscribe_packets(&self) -> broadcast::Receiver<GatewayPacket> {
        self.shared.packets.subscribe()
    }

    /// Every packet sent from now on, tokens redacted.
    #[must_use]
    pub fn sent_packets(&self) -> broadcast::Receiver<GatewayPacket> {
        self.shared.sent.subscribe()
    }

    /// The lossless, ordered packet stream of the current connection.
    ///
    /// Available once per [`connect`](Self::connect); the stream ends when
    /// the connection stops for good.
    pub fn take_ordered_packets(&self) -> Option<mpsc::UnboundedReceiver<GatewayPacket>> {
        self.shared.ordered_rx.lock().take()
    }

    /// Snapshot of the resumable session.
    #[must_use]
    pub fn session(&self) -> SessionInfo {
        self.shared.session.lock().clone()
    }

    /// Round trip of the last acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        *self.shared.latency.lock()
    }

    /// Open the socket and wait for HELLO.
    ///
    /// On success a background task identifies (or resumes a known session)
    /// and keeps the connection alive.
    ///
    /// # Errors
    ///
    /// `AuthenticationFailed` if the server closes with an authentication
    /// code before HELLO, `HelloTimeout` if HELLO does not arrive in time,
    /// `ConnectFailed` for anything else. The state is `Failed` afterwards.
    pub async fn connect(&self, gateway_url: &str, origin: &str) -> Result<()> {
        let mut driver = self.driver.lock().await;
        if driver.as_ref().is_some_and(|d| !d.task.is_finished()) {
            return Err(ClientError::GatewayConnection(
                "connection already running".to_string(),
            ));
        }
        *driver = None;

        let url = gateway_url_with_query(gateway_url, self.config.api_version)?;
        info!(url = %url, "connecting to gateway");
        self.shared.open_ordered();
        self.shared.transition(ConnectionState::Connecting);

        let (transport, interval) =
            match open(&*self.connector, &self.config, &self.shared, &url, origin).await {
                Ok(opened) => opened,
                Err(e) => {
                    error!(error = %e, "gateway connect failed");
                    self.shared.close_ordered();
                    self.shared.transition(ConnectionState::Failed);
                    return Err(e);
                }
            };

        let (commands, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let runner = Runner {
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            shared: Arc::clone(&self.shared),
            commands: rx,
            base_url: gateway_url.to_string(),
            origin: origin.to_string(),
            backoff: Backoff::new(self.config.reconnect.clone()),
            resume_pending: false,
        };
        let task = tokio::spawn(runner.run(transport, interval));
        *driver = Some(Driver { commands, task });
        Ok(())
    }

    /// Send an application packet.
    ///
    /// # Errors
    ///
    /// `NotConnected` if no socket is open, a protocol error for packets the
    /// connection manages itself, or the transport error.
    pub async fn send(&self, packet: GatewayPacket) -> Result<()> {
        if packet.op.is_control() {
            return Err(ProtoError::Validation(format!(
                "{} packets are managed by the connection",
                packet.op
            ))
            .into());
        }
        let commands = self
            .driver
            .lock()
            .await
            .as_ref()
            .map(|d| d.commands.clone())
            .ok_or(ClientError::NotConnected)?;

        let (reply, rx) = oneshot::channel();
        commands
            .send(Command::Send(packet, reply))
            .await
            .map_err(|_| ClientError::NotConnected)?;
        rx.await.map_err(|_| ClientError::NotConnected)?
    }

    /// Close the connection with `code` and wait for the close handshake.
    ///
    /// Does nothing if the connection is not running.
    pub async fn disconnect(&self, code: u16) {
        let Some(driver) = self.driver.lock().await.take() else {
            return;
        };
        if driver.task.is_finished() {
            return;
        }

        info!(code, "disconnecting from gateway");
        let (reply, rx) = oneshot::channel();
        if driver
            .commands
            .send(Command::Disconnect(code, reply))
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        if let Err(e) = driver.task.await {
            warn!(error = %e, "gateway task ended abnormally");
        }
    }
}

impl<C: Connector> std::fmt::Debug for GatewayConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("state", &self.state())
            .field("session", &self.session())
            .finish_non_exhaustive()
    }
}

/// Append `encoding=json&v=<version>`, replacing any existing values.
fn gateway_url_with_query(base: &str, version: u8) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "encoding" && k != "v")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("encoding", "json")
        .append_pair("v", &version.to_string());
    Ok(url)
}

/// Open a socket and wait for HELLO. Returns the heartbeat interval.
async fn open<C: Connector>(
    connector: &C,
    config: &GatewayConfig,
    shared: &Shared,
    url: &Url,
    origin: &str,
) -> Result<(C::Transport, Duration)> {
    let user_agent = &config.disguise.user_agent;
    let mut transport = timeout(
        config.connect_timeout,
        connector.connect(url, origin, user_agent),
    )
    .await
    .map_err(|_| {
        ClientError::ConnectFailed(format!("timed out after {:?}", config.connect_timeout))
    })??;

    let interval = timeout(
        config.hello_timeout,
        await_hello(&mut transport, &config.close_codes, shared),
    )
    .await
    .map_err(|_| ClientError::HelloTimeout(config.hello_timeout))??;

    debug!(interval_ms = interval.as_millis() as u64, "received HELLO");
    Ok((transport, interval))
}

async fn await_hello<T: Transport>(
    transport: &mut T,
    policy: &CloseCodePolicy,
    shared: &Shared,
) -> Result<Duration> {
    loop {
        match transport.recv().await {
            Some(Ok(Frame::Text(text))) => {
                let packet = match GatewayPacket::from_json(&text) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed packet before HELLO");
                        continue;
                    }
                };
                shared.publish_received(&packet);
                if packet.op == OpCode::Hello {
                    let hello: Hello = packet.payload()?;
                    if hello.heartbeat_interval == 0 {
                        return Err(ProtoError::Validation(
                            "HELLO with a zero heartbeat interval".to_string(),
                        )
                        .into());
                    }
                    return Ok(Duration::from_millis(hello.heartbeat_interval));
                }
                debug!(op = %packet.op, "ignoring packet before HELLO");
            }
            Some(Ok(Frame::Close(Some(close)))) if policy.is_authentication_failure(close.code) => {
                return Err(ClientError::AuthenticationFailed {
                    code: close.code,
                    reason: close.reason,
                });
            }
            Some(Ok(Frame::Close(close))) => {
                let code = close.map_or_else(|| "no code".to_string(), |c| c.code.to_string());
                return Err(ClientError::ConnectFailed(format!(
                    "closed before HELLO ({code})"
                )));
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(ClientError::ConnectFailed(
                    "connection closed before HELLO".to_string(),
                ));
            }
        }
    }
}

/// Why a socket stopped being driven.
enum Exit {
    /// Disconnect was requested.
    Stopped,
    /// The socket is gone; what to do next.
    Lost(CloseAction),
}

enum Flow {
    Continue,
    Exit(Exit),
}

/// The background task owning the socket.
struct Runner<C: Connector> {
    config: GatewayConfig,
    connector: Arc<C>,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    base_url: String,
    origin: String,
    backoff: Backoff,
    /// A Resume was sent on the current socket and not yet answered.
    resume_pending: bool,
}

impl<C: Connector> Runner<C> {
    async fn run(mut self, transport: C::Transport, interval: Duration) {
        let mut socket = Some((transport, interval));
        loop {
            let (transport, interval) = match socket.take() {
                Some(opened) => opened,
                None => match self.reconnect().await {
                    Some(opened) => opened,
                    None => break,
                },
            };

            match self.drive(transport, interval).await {
                Exit::Stopped => {
                    self.shared.transition(ConnectionState::Disconnected);
                    break;
                }
                Exit::Lost(CloseAction::FailAuthentication) => {
                    error!("gateway rejected the token");
                    self.shared.session.lock().clear();
                    self.shared.transition(ConnectionState::Failed);
                    break;
                }
                Exit::Lost(CloseAction::Fail) => {
                    error!("gateway closed with a fatal code");
                    self.shared.session.lock().clear();
                    self.shared.transition(ConnectionState::Failed);
                    break;
                }
                Exit::Lost(CloseAction::Reidentify) => {
                    info!("session invalidated, will identify again");
                    self.shared.session.lock().clear();
                }
                Exit::Lost(CloseAction::Resume) => {}
            }
        }
        self.shared.close_ordered();
    }

    /// Wait out the backoff and open a new socket. `None` means stop.
    async fn reconnect(&mut self) -> Option<(C::Transport, Duration)> {
        loop {
            self.shared.transition(ConnectionState::Reconnecting);
            let Some(delay) = self.backoff.next_delay() else {
                error!(
                    attempts = self.backoff.attempt(),
                    "giving up on the gateway after too many attempts"
                );
                self.shared.transition(ConnectionState::Failed);
                return None;
            };
            info!(
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting to gateway"
            );
            if !self.wait(delay).await {
                self.shared.transition(ConnectionState::Disconnected);
                return None;
            }

            let url = match self.reconnect_url() {
                Ok(url) => url,
                Err(e) => {
                    error!(error = %e, "invalid gateway url");
                    self.shared.transition(ConnectionState::Failed);
                    return None;
                }
            };
            self.shared.transition(ConnectionState::Connecting);
            match open(&*self.connector, &self.config, &self.shared, &url, &self.origin).await {
                Ok(opened) => return Some(opened),
                Err(ClientError::AuthenticationFailed { code, reason }) => {
                    error!(code, reason = %reason, "gateway rejected the token");
                    self.shared.transition(ConnectionState::Failed);
                    return None;
                }
                Err(e) => warn!(error = %e, "reconnect attempt failed"),
            }
        }
    }

    /// Sleep for `delay` while answering commands. Returns false on disconnect.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                () = sleep_until(deadline) => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(_, reply)) => {
                        let _ = reply.send(Err(ClientError::NotConnected));
                    }
                    Some(Command::Disconnect(_, reply)) => {
                        let _ = reply.send(());
                        return false;
                    }
                    None => return false,
                },
            }
        }
    }

    /// Resumes go to the URL READY named, when there is one.
    fn reconnect_url(&self) -> Result<Url> {
        let session = self.shared.session.lock().clone();
        let base = match (&session.session_id, &session.resume_url) {
            (Some(_), Some(resume_url)) => resume_url.as_str(),
            _ => self.base_url.as_str(),
        };
        gateway_url_with_query(base, self.config.api_version)
    }

    async fn drive(&mut self, mut transport: C::Transport, interval: Duration) -> Exit {
        let mut heartbeat = Heartbeat::start(interval, &self.config.heartbeat, Instant::now());
        let mut reidentify_at: Option<Instant> = None;
        self.resume_pending = false;

        if let Err(e) = self.begin_session(&mut transport).await {
            warn!(error = %e, "failed to start session");
            return Exit::Lost(CloseAction::Resume);
        }

        loop {
            let ack_deadline = heartbeat
                .ack_deadline()
                .filter(|_| self.shared.state.get() == ConnectionState::Connected);

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(packet, reply)) => {
                        let result = self.send_packet(&mut transport, &packet).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Disconnect(code, reply)) => {
                        self.close_gracefully(&mut transport, code).await;
                        let _ = reply.send(());
                        return Exit::Stopped;
                    }
                    None => {
                        self.close_gracefully(&mut transport, CLIENT_CLOSE_CODE).await;
                        return Exit::Stopped;
                    }
                },
                frame = transport.recv() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        match self.on_text(&mut transport, &mut heartbeat, &mut reidentify_at, &text).await {
                            Flow::Continue => {}
                            Flow::Exit(exit) => return exit,
                        }
                    }
                    Some(Ok(Frame::Close(close))) => {
                        let code = close.as_ref().map(|c| c.code);
                        let action = self.config.close_codes.classify(code);
                        info!(
                            code = ?code,
                            reason = close.as_ref().map_or("", |c| c.reason.as_str()),
                            action = ?action,
                            "gateway closed the connection"
                        );
                        return Exit::Lost(action);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "gateway connection lost");
                        return Exit::Lost(CloseAction::Resume);
                    }
                    None => {
                        warn!("gateway stream ended");
                        return Exit::Lost(CloseAction::Resume);
                    }
                },
                () = sleep_until(heartbeat.next_due()) => match heartbeat.on_due(Instant::now()) {
                    Beat::Send => {
                        let seq = self.shared.session.lock().seq;
                        if let Err(e) = self.send_packet(&mut transport, &GatewayPacket::heartbeat(seq)).await {
                            warn!(error = %e, "failed to send heartbeat");
                            return Exit::Lost(CloseAction::Resume);
                        }
                    }
                    Beat::Zombie => {
                        warn!("heartbeat not acknowledged, closing zombied connection");
                        if let Err(e) = transport.close(ZOMBIE_CLOSE_CODE, "zombied connection".to_string()).await {
                            debug!(error = %e, "close failed");
                        }
                        return Exit::Lost(CloseAction::Resume);
                    }
                },
                () = sleep_until(ack_deadline.unwrap_or_else(far_future)), if ack_deadline.is_some() => {
                    warn!("heartbeat ACK is late, connection unviable");
                    self.shared.transition(ConnectionState::Unviable);
                },
                () = sleep_until(reidentify_at.unwrap_or_else(far_future)), if reidentify_at.is_some() => {
                    reidentify_at = None;
                    if let Err(e) = self.begin_session(&mut transport).await {
                        warn!(error = %e, "failed to identify");
                        return Exit::Lost(CloseAction::Resume);
                    }
                },
            }
        }
    }

    async fn on_text(
        &mut self,
        transport: &mut C::Transport,
        heartbeat: &mut Heartbeat,
        reidentify_at: &mut Option<Instant>,
        text: &str,
    ) -> Flow {
        let packet = match GatewayPacket::from_json(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "dropping malformed gateway packet");
                return Flow::Continue;
            }
        };

        if let Some(seq) = packet.s {
            self.shared.session.lock().observe_seq(seq);
        }
        self.shared.publish_received(&packet);

        match packet.op {
            OpCode::Dispatch => match packet.event_name() {
                Some("READY") => {
                    match packet.payload::<ReadySession>() {
                        Ok(ready) => {
                            info!(session_id = %ready.session_id, "gateway session ready");
                            self.shared
                                .session
                                .lock()
                                .start(ready.session_id, ready.resume_gateway_url);
                        }
                        Err(e) => warn!(error = %e, "READY without a usable session"),
                    }
                    self.established();
                }
                Some("RESUMED") => {
                    info!("gateway session resumed");
                    self.established();
                }
                _ => {}
            },
            OpCode::Heartbeat => {
                let seq = self.shared.session.lock().seq;
                if let Err(e) = self
                    .send_packet(transport, &GatewayPacket::heartbeat(seq))
                    .await
                {
                    warn!(error = %e, "failed to answer heartbeat request");
                    return Flow::Exit(Exit::Lost(CloseAction::Resume));
                }
            }
            OpCode::HeartbeatAck => {
                if let Some(latency) = heartbeat.on_ack(Instant::now()) {
                    debug!(latency_ms = latency.as_millis() as u64, "heartbeat acknowledged");
                    *self.shared.latency.lock() = Some(latency);
                }
                if self.shared.state.get() == ConnectionState::Unviable {
                    info!("heartbeat ACK arrived, connection viable again");
                    self.shared.transition(ConnectionState::Connected);
                }
            }
            OpCode::Reconnect => {
                info!("gateway requested a reconnect");
                if let Err(e) = transport
                    .close(ZOMBIE_CLOSE_CODE, "reconnect requested".to_string())
                    .await
                {
                    debug!(error = %e, "close failed");
                }
                return Flow::Exit(Exit::Lost(CloseAction::Resume));
            }
            OpCode::InvalidSession => {
                let resumable = packet.d.as_ref().and_then(Value::as_bool).unwrap_or(false);
                let can_resume = self.shared.session.lock().can_resume();
                // An invalid session in answer to a Resume rejects it, whatever `d` says.
                let rejected_resume =
                    self.resume_pending || self.shared.state.get() == ConnectionState::Resuming;
                if resumable && can_resume && !rejected_resume {
                    info!("invalid session is resumable, resuming");
                    if let Err(e) = self.begin_session(transport).await {
                        warn!(error = %e, "failed to resume");
                        return Flow::Exit(Exit::Lost(CloseAction::Resume));
                    }
                } else {
                    self.resume_pending = false;
                    self.shared.session.lock().clear();
                    let delay = invalid_session_delay(self.config.invalid_session_delay);
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        rejected_resume,
                        "invalid session, identifying again"
                    );
                    *reidentify_at = Some(Instant::now() + delay);
                }
            }
            OpCode::Hello => debug!("ignoring HELLO on an established socket"),
            op => debug!(op = %op, "ignoring unexpected op"),
        }
        Flow::Continue
    }

    fn established(&mut self) {
        self.resume_pending = false;
        self.backoff.reset();
        self.shared.transition(ConnectionState::Connected);
    }

    /// Send resume if a session is known, identify otherwise.
    async fn begin_session(&mut self, transport: &mut C::Transport) -> Result<()> {
        let session = self.shared.session.lock().clone();
        let (packet, state) = match &session.session_id {
            Some(session_id) => (
                GatewayPacket::resume(&self.config.token, session_id, session.seq)?,
                ConnectionState::Resuming,
            ),
            None => (
                GatewayPacket::identify(&self.config.token, &self.config.disguise)?,
                ConnectionState::Identifying,
            ),
        };
        self.shared.transition(state);
        self.send_packet(transport, &packet).await?;
        self.resume_pending = packet.op == OpCode::Resume;
        Ok(())
    }

    async fn send_packet(&self, transport: &mut C::Transport, packet: &GatewayPacket) -> Result<()> {
        transport.send(packet.to_json()?).await?;
        debug!(op = %packet.op, "sent gateway packet");
        self.shared.publish_sent(packet);
        Ok(())
    }

    async fn close_gracefully(&self, transport: &mut C::Transport, code: u16) {
        if let Err(e) = transport.close(code, String::new()).await {
            debug!(error = %e, "close failed");
            return;
        }
        let drained = timeout(self.config.close_timeout, async {
            loop {
                match transport.recv().await {
                    Some(Ok(Frame::Close(_)) | Err(_)) | None => break,
                    Some(Ok(Frame::Text(_))) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!("close handshake timed out");
        }
    }
}

fn invalid_session_delay((min, max): (Duration, Duration)) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    if max_ms <= min_ms {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..=max_ms))
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}
