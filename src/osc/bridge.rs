use crate::config::OSC_HISTORY;
use crate::error::{EngineError, Result};
use crate::lock;
use crate::osc::address::{parse_command, played_address, OscCommand, BPM, IS_PLAYING};
use crate::state::{TrackId, TransportState};
use crate::transport::{Subscriber, Transport, TransportEvent};
use chrono::{DateTime, Local};
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, trace, warn};
use rosc::{OscMessage, OscPacket, OscType};
use std::collections::VecDeque;
use std::fmt;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tungstenite::{HandshakeError, Message, WebSocket};
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_ATTEMPT: Duration = Duration::from_millis(100);
const READ_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// The bridge endpoint and where the connection to it stands.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OscConnection {
    pub url: Option<String>,
    pub state: ConnectionState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedOsc {
    pub received_at: DateTime<Local>,
    pub address: String,
    pub args: Vec<OscType>,
}

/// Accepts plain `ws://` endpoints with a host.
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|e| EngineError::ConnectionError(format!("invalid bridge URL '{}': {}", url, e)))?;
    if parsed.scheme() != "ws" {
        return Err(EngineError::ConnectionError(format!(
            "unsupported bridge scheme '{}', expected ws",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none() {
        return Err(EngineError::ConnectionError(format!(
            "bridge URL '{}' has no host",
            url
        )));
    }
    Ok(parsed)
}

struct Connection {
    outbound: Sender<Vec<u8>>,
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct BridgeShared {
    transport: Arc<Transport>,
    connection: Mutex<OscConnection>,
    generation: AtomicU64,
    active: Mutex<Option<Connection>>,
    history: Mutex<VecDeque<ReceivedOsc>>,
}

impl BridgeShared {
    /// Apply a state change unless a newer connect/disconnect superseded it.
    fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        let mut connection = lock(&self.connection);
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        info!("OSC bridge {}", state);
        connection.state = state;
        true
    }

    fn is_connected(&self) -> bool {
        lock(&self.connection).state == ConnectionState::Connected
    }

    fn send_packet(&self, packet: &OscPacket) -> Result<()> {
        if !self.is_connected() {
            return Err(EngineError::ConnectionError(
                "OSC bridge not connected".to_string(),
            ));
        }
        let bytes = rosc::encoder::encode(packet)
            .map_err(|e| EngineError::InvalidMessage(format!("OSC encode failed: {}", e)))?;
        match lock(&self.active).as_ref() {
            Some(connection) => connection
                .outbound
                .send(bytes)
                .map_err(|_| EngineError::ConnectionError("OSC bridge closed".to_string())),
            None => Err(EngineError::ConnectionError(
                "OSC bridge not connected".to_string(),
            )),
        }
    }

    fn send_telemetry(&self, addr: &str, args: Vec<OscType>) {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        if let Err(e) = self.send_packet(&packet) {
            trace!("Telemetry {} dropped: {}", addr, e);
        }
    }

    fn handle_bytes(&self, bytes: &[u8]) {
        match rosc::decoder::decode_udp(bytes) {
            Ok((_, packet)) => self.handle_packet(&packet),
            Err(e) => warn!("Undecodable OSC packet ({} bytes): {:?}", bytes.len(), e),
        }
    }

    fn handle_packet(&self, packet: &OscPacket) {
        match packet {
            OscPacket::Message(msg) => self.handle_message(msg),
            OscPacket::Bundle(bundle) => {
                for packet in &bundle.content {
                    self.handle_packet(packet);
                }
            }
        }
    }

    fn handle_message(&self, msg: &OscMessage) {
        {
            let mut history = lock(&self.history);
            history.push_front(ReceivedOsc {
                received_at: Local::now(),
                address: msg.addr.clone(),
                args: msg.args.clone(),
            });
            history.truncate(OSC_HISTORY);
        }

        let applied = parse_command(msg).and_then(|command| {
            debug!("OSC command: {:?}", command);
            match command {
                OscCommand::Trigger { index } => self.transport.trigger_track_at(index).map(|_| ()),
                OscCommand::Volume { index, volume_db } => self
                    .transport
                    .set_track_volume_at(index, volume_db)
                    .map(|_| ()),
                OscCommand::Play => self.transport.set_playing(true),
                OscCommand::Stop => self.transport.set_playing(false),
                OscCommand::Bpm(bpm) => self.transport.set_bpm(bpm),
            }
        });
        if let Err(e) = applied {
            warn!("OSC message {} dropped: {}", msg.addr, e);
        }
    }
}

enum Handshake {
    Cancelled,
    Failed(String),
}

fn stop_requested(stop: &Receiver<()>, wait: Duration) -> bool {
    !matches!(stop.recv_timeout(wait), Err(RecvTimeoutError::Timeout))
}

/// Connect with short attempts so a stop request is seen between them.
fn open_stream(
    url: &Url,
    stop: &Receiver<()>,
    deadline: Instant,
) -> std::result::Result<TcpStream, Handshake> {
    let addrs = url
        .socket_addrs(|| Some(80))
        .map_err(|e| Handshake::Failed(e.to_string()))?;
    let mut last_error = format!("could not reach {}", url);
    for addr in &addrs {
        loop {
            if stop_requested(stop, Duration::ZERO) {
                return Err(Handshake::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Handshake::Failed(format!("timed out reaching {}", url)));
            }
            match TcpStream::connect_timeout(addr, CONNECT_ATTEMPT.min(remaining)) {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) => {
                    last_error = format!("could not reach {}: {}", addr, e);
                    break;
                }
            }
        }
    }
    Err(Handshake::Failed(last_error))
}

fn handshake(
    url: &Url,
    stop: &Receiver<()>,
) -> std::result::Result<WebSocket<TcpStream>, Handshake> {
    let failed = |e: std::io::Error| Handshake::Failed(e.to_string());
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    let stream = open_stream(url, stop, deadline)?;
    stream.set_nonblocking(true).map_err(failed)?;

    let mut attempt = tungstenite::client(url.as_str(), stream);
    let socket = loop {
        match attempt {
            Ok((socket, _)) => break socket,
            Err(HandshakeError::Interrupted(mid)) => {
                if stop_requested(stop, READ_POLL) {
                    return Err(Handshake::Cancelled);
                }
                if Instant::now() >= deadline {
                    return Err(Handshake::Failed(format!("handshake with {} timed out", url)));
                }
                attempt = mid.handshake();
            }
            Err(HandshakeError::Failure(e)) => return Err(Handshake::Failed(e.to_string())),
        }
    };

    let stream = socket.get_ref();
    stream.set_nonblocking(false).map_err(failed)?;
    stream.set_read_timeout(Some(READ_POLL)).map_err(failed)?;
    Ok(socket)
}

fn run_connection(
    weak: Weak<BridgeShared>,
    generation: u64,
    url: Url,
    outbound: Receiver<Vec<u8>>,
    stop: Receiver<()>,
) {
    let fail = |message: String| {
        if let Some(shared) = weak.upgrade() {
            shared.set_state(generation, ConnectionState::Error(message));
        }
    };

    let mut socket = match handshake(&url, &stop) {
        Ok(socket) => socket,
        Err(Handshake::Cancelled) => {
            debug!("OSC bridge connection to {} cancelled", url);
            return;
        }
        Err(Handshake::Failed(message)) => {
            error!("OSC bridge connection to {} failed: {}", url, message);
            fail(message);
            return;
        }
    };

    match weak.upgrade() {
        Some(shared) if shared.set_state(generation, ConnectionState::Connected) => {}
        _ => {
            let _ = socket.close(None);
            return;
        }
    }

    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }

        while let Ok(bytes) = outbound.try_recv() {
            if let Err(e) = socket.send(Message::Binary(bytes)) {
                fail(e.to_string());
                return;
            }
        }

        match socket.read() {
            Ok(Message::Binary(data)) => match weak.upgrade() {
                Some(shared) => shared.handle_bytes(&data),
                None => break,
            },
            Ok(Message::Close(_)) => {
                if let Some(shared) = weak.upgrade() {
                    shared.set_state(generation, ConnectionState::Disconnected);
                }
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                fail(e.to_string());
                return;
            }
        }
    }

    let _ = socket.close(None);
    let _ = socket.flush();
}

/// One WebSocket connection to an OSC bridge.
///
/// Inbound messages are applied to the transport; outbound telemetry follows
/// play state, tempo and fired steps. Reconnecting is always explicit.
#[derive(Clone)]
pub struct OscBridge {
    shared: Arc<BridgeShared>,
}

impl OscBridge {
    pub fn new(transport: Arc<Transport>) -> Self {
        OscBridge {
            shared: Arc::new(BridgeShared {
                transport,
                connection: Mutex::new(OscConnection::default()),
                generation: AtomicU64::new(0),
                active: Mutex::new(None),
                history: Mutex::new(VecDeque::with_capacity(OSC_HISTORY)),
            }),
        }
    }

    /// Tear down any current connection and start connecting to `url`.
    ///
    /// Returns once the attempt is under way; watch [`OscBridge::state`] for
    /// the outcome.
    pub fn connect(&self, url: &str) -> Result<()> {
        self.disconnect();

        let parsed = match validate_url(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                let mut connection = lock(&self.shared.connection);
                connection.url = Some(url.to_string());
                connection.state = ConnectionState::Error(e.to_string());
                return Err(e);
            }
        };

        let generation = {
            let mut connection = lock(&self.shared.connection);
            let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
            connection.url = Some(url.to_string());
            connection.state = ConnectionState::Connecting;
            generation
        };
        info!("Connecting OSC bridge to {}", url);

        let (outbound, outbound_rx) = unbounded();
        let (stop, stop_rx) = bounded::<()>(0);
        let weak = Arc::downgrade(&self.shared);
        let handle = thread::spawn(move || run_connection(weak, generation, parsed, outbound_rx, stop_rx));

        *lock(&self.shared.active) = Some(Connection {
            outbound,
            stop,
            handle,
        });
        Ok(())
    }

    /// Close the connection (if any) and wait for its thread to finish.
    pub fn disconnect(&self) {
        let active = lock(&self.shared.active).take();
        {
            let mut connection = lock(&self.shared.connection);
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            if connection.state != ConnectionState::Disconnected {
                info!("OSC bridge disconnected");
            }
            connection.state = ConnectionState::Disconnected;
        }

        if let Some(Connection {
            outbound,
            stop,
            handle,
        }) = active
        {
            drop(stop);
            drop(outbound);
            let _ = handle.join();
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.connection).state.clone()
    }

    pub fn connection(&self) -> OscConnection {
        lock(&self.shared.connection).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// User-initiated send; fails with `ConnectionError` when not connected.
    pub fn send_message(&self, address: &str, args: Vec<OscType>) -> Result<()> {
        if !address.starts_with('/') {
            return Err(EngineError::InvalidMessage(format!(
                "OSC address must start with '/': {}",
                address
            )));
        }
        self.shared.send_packet(&OscPacket::Message(OscMessage {
            addr: address.to_string(),
            args,
        }))
    }

    pub fn send_step_played(&self, track: TrackId) -> Result<()> {
        self.send_message(&played_address(track), Vec::new())
    }

    /// Dispatch a packet as if the bridge had delivered it.
    pub fn handle_packet(&self, packet: &OscPacket) {
        self.shared.handle_packet(packet);
    }

    /// Most recent first, at most five.
    pub fn received(&self) -> Vec<ReceivedOsc> {
        lock(&self.shared.history).iter().cloned().collect()
    }

    pub fn shutdown(&self) {
        self.disconnect();
    }
}

impl Subscriber for OscBridge {
    fn on_transport_event(&self, event: &TransportEvent, _state: &TransportState) {
        match event {
            TransportEvent::PlayStateChanged(playing) => self
                .shared
                .send_telemetry(IS_PLAYING, vec![OscType::Int(i32::from(*playing))]),
            TransportEvent::TempoChanged(bpm) => self
                .shared
                .send_telemetry(BPM, vec![OscType::Double(*bpm)]),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("ws://localhost:8080").is_ok());
        assert!(validate_url("ws://127.0.0.1:9000/osc").is_ok());
        for url in ["http://localhost", "not a url", "wss://example.com", ""] {
            assert!(matches!(
                validate_url(url),
                Err(EngineError::ConnectionError(_))
            ));
        }
    }

    #[test]
    fn test_invalid_url_sets_error_state() {
        let bridge = OscBridge::new(Arc::new(Transport::new()));
        assert!(bridge.connect("http://localhost").is_err());
        assert!(matches!(bridge.state(), ConnectionState::Error(_)));
        bridge.disconnect();
        assert_eq!(bridge.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_send_without_connection() {
        let bridge = OscBridge::new(Arc::new(Transport::new()));
        assert!(matches!(
            bridge.send_step_played(TrackId(0)),
            Err(EngineError::ConnectionError(_))
        ));
        assert!(matches!(
            bridge.send_message("no-slash", vec![]),
            Err(EngineError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_history_keeps_last_five() {
        let bridge = OscBridge::new(Arc::new(Transport::new()));
        for i in 0..7 {
            bridge.handle_packet(&OscPacket::Message(OscMessage {
                addr: format!("/unknown/{}", i),
                args: vec![],
            }));
        }
        let received = bridge.received();
        assert_eq!(received.len(), 5);
        assert_eq!(received[0].address, "/unknown/6");
        assert_eq!(received[4].address, "/unknown/2");
    }
}
