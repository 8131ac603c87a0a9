//! The UDP front end: receives datagrams, routes them through the rack,
//! advances the rack and fans every outbound message out to known peers.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use crate::catalog::ModuleCatalog;
use crate::config::ServerConfig;
use crate::module::Value;
use crate::osc::{Argument, Encoder, Message, Parser};
use crate::peers::{PeerSet, PeerStore};
use crate::rack::{Outbound, Rack};
use crate::{Result, VrackError};

/// Largest datagram read in one receive.
const MAX_DATAGRAM: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    /// Socket bound, no tick run yet.
    Listening,
    Running,
    Stopped,
}

/// Datagram transport driven by the server loop.
pub trait Transport {
    /// Returns the next pending datagram, or `None` if nothing is waiting.
    /// Must not block.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn send_to(&mut self, bytes: &[u8], target: SocketAddr) -> io::Result<usize>;
}

/// Non-blocking UDP socket listening on every interface.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl Transport for UdpTransport {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn send_to(&mut self, bytes: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(bytes, target)
    }
}

pub struct OscServer<T: Transport = UdpTransport> {
    config: ServerConfig,
    state: ServerState,
    rack: Rack,
    transport: Option<T>,
    parser: Parser,
    encoder: Encoder,
    peers: PeerSet,
    store: Option<PeerStore>,
    self_ip: IpAddr,
    recv_buffer: Vec<u8>,
}

impl<T: Transport> OscServer<T> {
    pub fn new(config: ServerConfig, catalog: ModuleCatalog) -> Self {
        let store = config
            .peer_store
            .clone()
            .or_else(PeerStore::default_path)
            .map(PeerStore::new);
        let rack = Rack::new(catalog).with_output_interval(config.output_interval());

        Self {
            encoder: Encoder::with_capacity(config.encoder_capacity),
            self_ip: config.advertise_ip.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            config,
            state: ServerState::Idle,
            rack,
            transport: None,
            parser: Parser::new(),
            peers: PeerSet::new(),
            store,
            recv_buffer: vec![0; MAX_DATAGRAM],
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn rack(&self) -> &Rack {
        &self.rack
    }

    pub fn rack_mut(&mut self) -> &mut Rack {
        &mut self.rack
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Address this server reports to its peers.
    pub fn self_ip(&self) -> IpAddr {
        self.self_ip
    }

    pub fn transport_mut(&mut self) -> Option<&mut T> {
        self.transport.as_mut()
    }

    /// Starts serving over `transport`, greeting every persisted peer.
    pub fn start_with(&mut self, transport: T) -> Result<()> {
        if matches!(self.state, ServerState::Listening | ServerState::Running) {
            return Err(VrackError::msg("server is already running"));
        }

        self.self_ip = self.config.advertise_ip.unwrap_or_else(detect_local_ip);
        self.transport = Some(transport);

        if let Some(store) = &self.store {
            match store.load() {
                Ok(stored) => {
                    for ip in stored.iter() {
                        self.peers.insert(*ip);
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, path = %store.path().display(), "could not load peers")
                }
            }
        }

        let greeting = Message::new("/Initialise", vec![Argument::Str(self.self_ip.to_string())]);
        self.broadcast(&greeting);

        self.state = ServerState::Listening;
        tracing::info!(
            port = self.config.listen_port,
            self_ip = %self.self_ip,
            peers = self.peers.len(),
            "OSC server listening"
        );
        Ok(())
    }

    /// Runs one frame: receive, route, advance the rack, send.
    pub fn tick(&mut self, delta: Duration) -> Result<()> {
        if !matches!(self.state, ServerState::Listening | ServerState::Running) {
            return Err(VrackError::NotRunning);
        }
        self.state = ServerState::Running;

        self.receive();
        self.route();
        self.rack.tick(delta);
        self.flush();
        Ok(())
    }

    /// Persists the peer list and releases the transport.
    pub fn stop(&mut self) -> Result<()> {
        if !matches!(self.state, ServerState::Listening | ServerState::Running) {
            return Ok(());
        }
        self.transport = None;
        self.state = ServerState::Stopped;
        tracing::info!(peers = self.peers.len(), "OSC server stopped");

        match &self.store {
            Some(store) => store.save(&self.peers),
            None => Ok(()),
        }
    }

    fn receive(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        loop {
            let (len, from) = match transport.recv_from(&mut self.recv_buffer) {
                Ok(Some(received)) => received,
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(%err, "receive failed");
                    break;
                }
            };

            if self.peers.insert(from.ip()) {
                tracing::info!(peer = %from.ip(), "discovered peer");
            }
            if let Err(err) = self.parser.feed(&self.recv_buffer[..len]) {
                tracing::warn!(%err, %from, "dropped malformed datagram");
            }
        }
    }

    fn route(&mut self) {
        while let Some(message) = self.parser.pop() {
            if self.config.log_incoming {
                tracing::debug!(%message, "incoming");
            }
            match self.rack.handle(&message) {
                Ok(()) => {}
                Err(err @ VrackError::UnknownAddress(_)) => tracing::debug!(%err, "dropped message"),
                Err(err) => tracing::warn!(%err, path = %message.path, "dropped message"),
            }
        }
    }

    fn flush(&mut self) {
        let outbound: Vec<Outbound> = self.rack.drain_outbox().collect();
        for item in &outbound {
            let message = outbound_message(item, self.self_ip);
            self.broadcast(&message);
        }
    }

    fn broadcast(&mut self, message: &Message) {
        if self.peers.is_empty() {
            return;
        }
        self.encoder.clear();
        if let Err(err) = self.encoder.encode(message) {
            tracing::warn!(%err, path = %message.path, "could not encode outbound message");
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        for peer in self.peers.iter() {
            let target = SocketAddr::new(*peer, self.config.send_port);
            if let Err(err) = transport.send_to(self.encoder.as_bytes(), target) {
                tracing::warn!(%err, %target, "send failed");
            }
        }
    }
}

impl OscServer<UdpTransport> {
    /// Binds the configured listen port and starts serving.
    pub fn start(&mut self) -> Result<()> {
        let transport = UdpTransport::bind(self.config.listen_port)?;
        tracing::debug!(addr = %transport.local_addr()?, "bound listen socket");
        self.start_with(transport)
    }
}

/// Builds the wire form of something the rack queued.
pub fn outbound_message(outbound: &Outbound, self_ip: IpAddr) -> Message {
    match outbound {
        Outbound::Output { address, value } => {
            Message::new(address.clone(), vec![value_argument(value)])
        }
        Outbound::QueryResponse { address, values } => {
            let mut payload = format!("{self_ip};");
            for value in values {
                payload.push_str(value);
                payload.push(';');
            }
            Message::new(address.clone(), vec![Argument::Str(payload)])
        }
        Outbound::QueryConnections { instance } => Message::new(
            "/QueryConnections",
            vec![Argument::Str(format!("Instance{instance}"))],
        ),
    }
}

/// Booleans travel as a 10/0 voltage.
fn value_argument(value: &Value) -> Argument {
    match value {
        Value::Float(v) => Argument::Float(*v),
        Value::Int(v) => Argument::Int(*v),
        Value::Bool(_) => Argument::Float(value.as_voltage().unwrap_or_default()),
        Value::Str(v) => Argument::Str(v.clone()),
    }
}

/// Address of the interface that routes outward, or loopback if there is none.
/// Connecting a UDP socket sends nothing.
pub fn detect_local_ip() -> IpAddr {
    let outward = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        Ok(socket.local_addr()?.ip())
    };
    match outward() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Err(err) => {
            tracing::debug!(%err, "falling back to loopback as self address");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Encodes `message` and sends it once to `target` from an ephemeral socket.
pub fn send_message(target: SocketAddr, message: &Message) -> Result<()> {
    let mut encoder = Encoder::new();
    encoder.encode(message)?;
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.send_to(encoder.as_bytes(), target)?;
    Ok(())
}
