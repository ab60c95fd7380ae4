//! UDP framing transport: socket lifecycle, server/client role, peer
//! tracking, background receive loop and thread-safe send.
//!
//! This mirrors the original gateway's `dkmrtp::ipc::DkmRtpIpc`: a single
//! background thread blocks on the socket with a short read timeout so
//! that `stop()` can observe the running flag, and all sends go through a
//! mutex so that a frame's header and payload reach the wire as one
//! datagram.

use std::{
  io,
  net::{SocketAddr, UdpSocket},
  sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use socket2::{Domain, Socket, Type};

use crate::frame::{self, FrameHeader, FrameRejectReason, FrameType};

/// Maximum size of a single incoming datagram we will attempt to read.
/// UDP payloads cannot exceed ~65507 bytes over IPv4; 64 KiB is a safe
/// upper bound for the receive buffer.
const RECV_BUF_LEN: usize = 64 * 1024;

/// How long the receive thread blocks on the socket before re-checking the
/// running flag (spec.md §4.2, §5).
const RECV_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Whether this transport instance binds and waits for peers, or connects
/// out to a single fixed peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Server,
  Client,
}

/// A bind (server) or peer (client) address.
#[derive(Debug, Clone)]
pub struct Endpoint {
  pub address: String,
  pub port: u16,
}

impl Endpoint {
  pub fn new(address: impl Into<String>, port: u16) -> Self {
    Endpoint { address: address.into(), port }
  }

  fn to_socket_addr(&self) -> io::Result<SocketAddr> {
    use std::net::ToSocketAddrs;
    (self.address.as_str(), self.port)
      .to_socket_addrs()?
      .next()
      .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unresolvable endpoint"))
  }
}

/// Counters observed by the gateway's monitor tick. Grounded in the
/// original `stats_manager.hpp`'s frame-level counters.
#[derive(Default)]
pub struct TransportStats {
  pub frames_received: AtomicU64,
  pub frames_rejected: AtomicU64,
  pub frames_sent: AtomicU64,
}

impl TransportStats {
  pub fn snapshot(&self) -> (u64, u64, u64) {
    (
      self.frames_received.load(Ordering::Relaxed),
      self.frames_rejected.load(Ordering::Relaxed),
      self.frames_sent.load(Ordering::Relaxed),
    )
  }
}

type FrameCallback = Box<dyn Fn(FrameHeader, &[u8]) + Send + Sync>;

/// The four dispatch slots a decoded frame can land in. Legacy `0x01xx`/
/// `0x02xx` codes (spec.md §6) are routed to `on_legacy`, coexisting with
/// the unified REQ/RSP/EVT model.
#[derive(Default)]
pub struct Callbacks {
  pub on_request: Option<FrameCallback>,
  pub on_response: Option<FrameCallback>,
  pub on_event: Option<FrameCallback>,
  pub on_legacy: Option<FrameCallback>,
  pub on_unhandled: Option<FrameCallback>,
}

struct Inner {
  role: Role,
  socket: UdpSocket,
  running: AtomicBool,
  last_peer: Mutex<Option<SocketAddr>>,
  peer: Option<SocketAddr>,
  send_lock: Mutex<()>,
  callbacks: Mutex<Callbacks>,
  stats: TransportStats,
}

/// A UDP framing transport. Cloning shares the same underlying socket and
/// state; `stop()` on any clone stops the receive thread for all of them.
#[derive(Clone)]
pub struct Transport {
  inner: Arc<Inner>,
}

impl Transport {
  /// Bind (server) or connect-in-the-datagram-pseudo-connect-sense
  /// (client) and start the background receive thread.
  pub fn start(role: Role, endpoint: &Endpoint) -> io::Result<(Transport, JoinHandle<()>)> {
    let addr = endpoint.to_socket_addr()?;
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket2 = Socket::new(domain, Type::DGRAM, None)?;
    socket2.set_reuse_address(true)?;

    let (peer, bound_addr): (Option<SocketAddr>, SocketAddr) = match role {
      Role::Server => {
        socket2.bind(&addr.into())?;
        (None, addr)
      }
      Role::Client => {
        // Bind an ephemeral local port, then remember the peer to send to.
        let any: SocketAddr =
          if addr.is_ipv4() { "0.0.0.0:0".parse().unwrap() } else { "[::]:0".parse().unwrap() };
        socket2.bind(&any.into())?;
        (Some(addr), addr)
      }
    };
    let _ = bound_addr;

    socket2.set_read_timeout(Some(RECV_POLL_TIMEOUT))?;
    let socket: UdpSocket = socket2.into();

    let inner = Arc::new(Inner {
      role,
      socket,
      running: AtomicBool::new(true),
      last_peer: Mutex::new(None),
      peer,
      send_lock: Mutex::new(()),
      callbacks: Mutex::new(Callbacks::default()),
      stats: TransportStats::default(),
    });

    let recv_inner = Arc::clone(&inner);
    let handle = thread::Builder::new()
      .name("rtpdds-transport-recv".into())
      .spawn(move || recv_loop(recv_inner))
      .expect("spawning the transport receive thread should not fail");

    Ok((Transport { inner }, handle))
  }

  /// Install (or replace) the dispatch callbacks. Thread-safe; takes
  /// effect for subsequently received frames.
  pub fn set_callbacks(&self, callbacks: Callbacks) {
    *self.inner.callbacks.lock().expect("callbacks mutex poisoned") = callbacks;
  }

  pub fn stats(&self) -> &TransportStats {
    &self.inner.stats
  }

  /// Send a frame. Fails if this is a server transport that has not yet
  /// observed any peer (spec.md §4.2).
  pub fn send(&self, frame_type: FrameType, corr_id: u32, payload: &[u8]) -> io::Result<()> {
    let dest = match self.inner.role {
      Role::Client => self.inner.peer.expect("client transport always has a configured peer"),
      Role::Server => {
        let guard = self.inner.last_peer.lock().expect("last_peer mutex poisoned");
        match *guard {
          Some(addr) => addr,
          None => {
            return Err(io::Error::new(
              io::ErrorKind::NotConnected,
              "server transport has not observed a peer yet",
            ))
          }
        }
      }
    };

    let wire = frame::encode(frame_type, corr_id, payload);
    let _guard = self.inner.send_lock.lock().expect("send_lock mutex poisoned");
    self.inner.socket.send_to(&wire, dest)?;
    self.inner.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
    Ok(())
  }

  /// Idempotent shutdown: clears the running flag so the receive thread
  /// observes it on its next timeout tick. Callers should join the handle
  /// returned by [`Transport::start`] afterwards.
  pub fn stop(&self) {
    self.inner.running.store(false, Ordering::SeqCst);
  }

  pub fn is_running(&self) -> bool {
    self.inner.running.load(Ordering::SeqCst)
  }

  /// Most recently observed peer address, if any (server role only).
  pub fn last_peer(&self) -> Option<SocketAddr> {
    *self.inner.last_peer.lock().expect("last_peer mutex poisoned")
  }
}

fn recv_loop(inner: Arc<Inner>) {
  let mut buf = vec![0u8; RECV_BUF_LEN];
  while inner.running.load(Ordering::SeqCst) {
    let (n, from) = match inner.socket.recv_from(&mut buf) {
      Ok(v) => v,
      Err(ref e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
        continue;
      }
      Err(_) => continue,
    };

    if inner.role == Role::Server {
      *inner.last_peer.lock().expect("last_peer mutex poisoned") = Some(from);
    }

    match frame::decode(&buf[..n]) {
      Ok((header, payload)) => {
        inner.stats.frames_received.fetch_add(1, Ordering::Relaxed);
        dispatch(&inner, header, payload);
      }
      Err(_reason @ (FrameRejectReason::TooShort
      | FrameRejectReason::BadMagic
      | FrameRejectReason::BadVersion
      | FrameRejectReason::LengthMismatch)) => {
        // Silently discarded per spec.md §7: a bad packet on a public UDP
        // port must not produce a log flood. Only the counter moves.
        inner.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
      }
    }
  }
}

fn dispatch(inner: &Arc<Inner>, header: FrameHeader, payload: &[u8]) {
  let callbacks = inner.callbacks.lock().expect("callbacks mutex poisoned");
  let kind = FrameType::from_wire(header.frame_type);
  let cb = match kind {
    FrameType::Req => callbacks.on_request.as_ref(),
    FrameType::Rsp => callbacks.on_response.as_ref(),
    FrameType::Evt => callbacks.on_event.as_ref(),
    FrameType::Legacy(_) => callbacks.on_legacy.as_ref(),
    FrameType::Unknown(_) => None,
  };
  match cb.or(callbacks.on_unhandled.as_ref()) {
    Some(f) => f(header, payload),
    None => {}
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use super::*;

  fn free_port_endpoint() -> Endpoint {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port();
    drop(socket);
    Endpoint::new("127.0.0.1", port)
  }

  #[test]
  fn client_send_before_server_seen_does_not_panic() {
    let ep = free_port_endpoint();
    let (server, server_handle) = Transport::start(Role::Server, &ep).unwrap();
    assert!(server.send(FrameType::Rsp, 1, b"x").is_err());
    server.stop();
    server_handle.join().unwrap();
  }

  #[test]
  fn request_round_trip_invokes_callback_with_same_corr_id() {
    let ep = free_port_endpoint();
    let (server, server_handle) = Transport::start(Role::Server, &ep).unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = Arc::clone(&received);
    server.set_callbacks(Callbacks {
      on_request: Some(Box::new(move |header, payload| {
        assert_eq!(header.corr_id, 7);
        assert_eq!(payload, b"ping");
        received_clone.fetch_add(1, Ordering::SeqCst);
      })),
      ..Default::default()
    });

    let (client, client_handle) = Transport::start(Role::Client, &ep).unwrap();
    client.send(FrameType::Req, 7, b"ping").unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while received.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
      thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(received.load(Ordering::SeqCst), 1);

    client.stop();
    server.stop();
    client_handle.join().unwrap();
    server_handle.join().unwrap();
  }

  #[test]
  fn stop_is_idempotent() {
    let ep = free_port_endpoint();
    let (server, handle) = Transport::start(Role::Server, &ep).unwrap();
    server.stop();
    server.stop();
    handle.join().unwrap();
    assert!(!server.is_running());
  }
}
