//! End-to-end scenarios driving a real `GatewayApp` over a loopback UDP
//! socket, the way an actual UI client would: encode a request as a REQ
//! frame, send it, and decode whatever RSP/EVT frames come back.

use std::{
  net::UdpSocket,
  time::{Duration, Instant},
};

use rtpdds_gateway::{
  config::{ConfiguredRole, DdsConfig, GatewayConfig, LoggingConfig, NetworkConfig, ReceiveMode},
  frame::{self, FrameType},
  gateway::GatewayApp,
  rpc::{ArgsShape, RequestShape, ResponseShape, TargetShape},
};
use serde_json::json;

fn free_port() -> u16 {
  let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
  socket.local_addr().unwrap().port()
}

fn test_config(port: u16) -> GatewayConfig {
  GatewayConfig {
    network: NetworkConfig { role: ConfiguredRole::Server, bind: "127.0.0.1".to_string(), port },
    dds: DdsConfig { qos_dir: std::env::temp_dir().display().to_string(), receive_mode: ReceiveMode::Waitset },
    logging: LoggingConfig { level: "off".to_string(), console: false },
  }
}

struct Client {
  socket: UdpSocket,
  server: std::net::SocketAddr,
  next_corr_id: u32,
}

impl Client {
  fn connect(port: u16) -> Client {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    Client { socket, server: format!("127.0.0.1:{port}").parse().unwrap(), next_corr_id: 1 }
  }

  fn request(&mut self, req: &RequestShape) -> ResponseShape {
    let corr_id = self.next_corr_id;
    self.next_corr_id += 1;
    let payload = rtpdds_gateway::rpc::encode(req).unwrap();
    let wire = frame::encode(FrameType::Req, corr_id, &payload);
    self.socket.send_to(&wire, self.server).unwrap();

    loop {
      let mut buf = vec![0u8; 64 * 1024];
      let (n, _from) = self.socket.recv_from(&mut buf).expect("response within timeout");
      let (header, payload) = frame::decode(&buf[..n]).expect("well-formed frame");
      if FrameType::from_wire(header.frame_type) == FrameType::Rsp && header.corr_id == corr_id {
        return rtpdds_gateway::rpc::decode(payload).expect("well-formed response");
      }
      // An EVT frame interleaved before the matching RSP; keep waiting.
    }
  }

  fn recv_event(&mut self, deadline: Instant) -> Option<Vec<u8>> {
    loop {
      if Instant::now() >= deadline {
        return None;
      }
      let mut buf = vec![0u8; 64 * 1024];
      let (n, _from) = match self.socket.recv_from(&mut buf) {
        Ok(v) => v,
        Err(_) => return None,
      };
      let (header, payload) = frame::decode(&buf[..n]).expect("well-formed frame");
      if FrameType::from_wire(header.frame_type) == FrameType::Evt {
        return Some(payload.to_vec());
      }
    }
  }
}

fn create_writer_req(domain: i32, publisher: &str, topic: &str, type_name: &str) -> RequestShape {
  RequestShape {
    op: "create".to_string(),
    target: Some(TargetShape {
      kind: "writer".to_string(),
      domain: Some(domain),
      publisher: Some(publisher.to_string()),
      topic: Some(topic.to_string()),
      ..Default::default()
    }),
    args: Some(ArgsShape { type_name: Some(type_name.to_string()), ..Default::default() }),
    data: None,
  }
}

fn create_reader_req(domain: i32, subscriber: &str, topic: &str, type_name: &str) -> RequestShape {
  RequestShape {
    op: "create".to_string(),
    target: Some(TargetShape {
      kind: "reader".to_string(),
      domain: Some(domain),
      subscriber: Some(subscriber.to_string()),
      topic: Some(topic.to_string()),
      ..Default::default()
    }),
    args: Some(ArgsShape { type_name: Some(type_name.to_string()), ..Default::default() }),
    data: None,
  }
}

#[test]
fn hello_returns_ok_and_known_types() {
  let port = free_port();
  let config = test_config(port);
  let mut app = GatewayApp::new(&config);
  app.start(&config).unwrap();

  let mut client = Client::connect(port);
  let resp = client.request(&RequestShape { op: "hello".to_string(), target: None, args: None, data: None });
  assert!(resp.ok);
  assert_eq!(resp.result.unwrap()["types"], json!(["StringMsg", "AlarmMsg"]));

  app.stop();
}

#[test]
fn duplicate_participant_is_reported_as_logic_error() {
  let port = free_port();
  let config = test_config(port);
  let mut app = GatewayApp::new(&config);
  app.start(&config).unwrap();
  let mut client = Client::connect(port);

  let create_participant = RequestShape {
    op: "create".to_string(),
    target: Some(TargetShape { kind: "participant".to_string(), domain: Some(7), ..Default::default() }),
    args: None,
    data: None,
  };
  let first = client.request(&create_participant);
  assert!(first.ok);
  let second = client.request(&create_participant);
  assert!(!second.ok);
  assert_eq!(second.category, Some(1));
  let msg = second.msg.expect("logic error carries a message");
  assert!(msg.contains("Participant already exists"));
  assert!(msg.contains("domain=7"));

  app.stop();
}

#[test]
fn writer_and_reader_on_same_topic_reject_conflicting_type() {
  let port = free_port();
  let config = test_config(port);
  let mut app = GatewayApp::new(&config);
  app.start(&config).unwrap();
  let mut client = Client::connect(port);

  let ok = client.request(&create_writer_req(0, "pub1", "alerts", "AlarmMsg"));
  assert!(ok.ok);
  let conflict = client.request(&create_reader_req(0, "sub1", "alerts", "StringMsg"));
  assert!(!conflict.ok);
  assert_eq!(conflict.category, Some(1));
  assert!(conflict.msg.expect("logic error carries a message").contains("already exists with type 'AlarmMsg'"));

  app.stop();
}

#[test]
fn publish_round_trip_delivers_an_evt_frame() {
  let port = free_port();
  let config = test_config(port);
  let mut app = GatewayApp::new(&config);
  app.start(&config).unwrap();
  let mut client = Client::connect(port);

  assert!(client.request(&create_writer_req(0, "pub1", "greetings", "StringMsg")).ok);
  assert!(client.request(&create_reader_req(0, "sub1", "greetings", "StringMsg")).ok);

  let set_callback = RequestShape {
    op: "set".to_string(),
    target: Some(TargetShape {
      kind: "reader".to_string(),
      domain: Some(0),
      subscriber: Some("sub1".to_string()),
      topic: Some("greetings".to_string()),
      ..Default::default()
    }),
    args: None,
    data: None,
  };
  assert!(client.request(&set_callback).ok);

  let publish = RequestShape {
    op: "write".to_string(),
    target: Some(TargetShape {
      kind: "writer".to_string(),
      domain: Some(0),
      publisher: Some("pub1".to_string()),
      topic: Some("greetings".to_string()),
      ..Default::default()
    }),
    args: None,
    data: Some(json!({"text": "hello from the UI"})),
  };
  assert!(client.request(&publish).ok);

  let event_bytes = client.recv_event(Instant::now() + Duration::from_secs(3)).expect("event within timeout");
  let event: serde_json::Value = rtpdds_gateway::rpc::decode(&event_bytes).unwrap();
  assert_eq!(event["evt"], json!("data"));
  assert_eq!(event["topic"], json!("greetings"));
  assert_eq!(event["data"]["text"], json!("hello from the UI"));

  app.stop();
}

#[test]
fn malformed_request_bytes_yield_a_parse_error_response_not_a_crash() {
  let port = free_port();
  let config = test_config(port);
  let mut app = GatewayApp::new(&config);
  app.start(&config).unwrap();

  let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
  socket.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
  let server: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
  let garbage = frame::encode(FrameType::Req, 99, &[0xff, 0x00, 0x01, 0xff]);
  socket.send_to(&garbage, server).unwrap();

  let mut buf = vec![0u8; 64 * 1024];
  let (n, _) = socket.recv_from(&mut buf).expect("a response even for garbage payload");
  let (header, payload) = frame::decode(&buf[..n]).unwrap();
  assert_eq!(header.corr_id, 99);
  let resp: ResponseShape = rtpdds_gateway::rpc::decode(payload).unwrap();
  assert!(!resp.ok);
  assert_eq!(resp.err_kind.as_deref(), Some("parse"));

  app.stop();
}

#[test]
fn frames_with_bad_magic_are_silently_dropped() {
  let port = free_port();
  let config = test_config(port);
  let mut app = GatewayApp::new(&config);
  app.start(&config).unwrap();

  let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
  socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
  let server: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
  socket.send_to(&[0u8; 24], server).unwrap();

  let mut buf = vec![0u8; 64];
  assert!(socket.recv_from(&mut buf).is_err(), "no response should ever arrive for a bad-magic datagram");

  app.stop();
}
