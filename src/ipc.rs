//! Decodes REQ payloads, dispatches them against the manager, and
//! encodes the RSP/EVT payloads that go back out over the transport.
//!
//! Grounded in `ipc_adapter.hpp`/`ipc_adapter.cpp`'s dispatch-by-(op,
//! target.kind) table and its `emit_evt_from_sample` projection. Unlike
//! the original, actual manager calls and socket sends never happen on
//! the same thread that decoded the request — [`IpcAdapter::process_request`]
//! and [`IpcAdapter::emit_event_frame`] are meant to be invoked from the
//! event processor's worker thread, with the network receive thread only
//! ever enqueuing a [`CommandEvent`].

use std::sync::Arc;

use crate::{
  entity::EntityRegistry,
  error::{BoundaryError, DdsError},
  events::{AsyncProcessor, SampleEvent},
  manager::DdsManager,
  rpc::{ArgsShape, EventShape, RequestShape, ResponseShape, TargetShape},
};

#[derive(Clone)]
pub struct IpcAdapter {
  manager: Arc<DdsManager>,
  processor: AsyncProcessor,
  registry: EntityRegistry,
}

impl IpcAdapter {
  pub fn new(manager: Arc<DdsManager>, processor: AsyncProcessor) -> IpcAdapter {
    IpcAdapter { manager, processor, registry: EntityRegistry::new() }
  }

  /// Decode `payload` as a [`RequestShape`], dispatch it, and encode the
  /// resulting [`ResponseShape`]. Never fails: a decode error becomes an
  /// error response rather than propagating, and a panic inside
  /// dispatch is caught rather than taking down the worker thread,
  /// since every REQ must be answered by exactly one RSP (spec.md §5,
  /// §4.7 points 1 and 4).
  pub fn process_request(&self, payload: &[u8]) -> Vec<u8> {
    let response = match crate::rpc::decode::<RequestShape>(payload) {
      Ok(req) => {
        let adapter = self.clone();
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| adapter.dispatch(req))).unwrap_or_else(|panic| {
          let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "dispatch panicked".to_string());
          ResponseShape::from_boundary_error(&BoundaryError::Internal(detail))
        })
      }
      Err(e) => ResponseShape::from_boundary_error(&BoundaryError::Parse(e.to_string())),
    };
    crate::rpc::encode(&response).unwrap_or_else(|e| {
      crate::rpc::encode(&ResponseShape::from_boundary_error(&BoundaryError::Internal(e.to_string())))
        .expect("an error ResponseShape always encodes")
    })
  }

  /// Encode a sample observed on a reader as an EVT frame payload
  /// (`{evt:"data", topic, type, data}`, corr_id 0 — spec.md §4.1, §6).
  pub fn emit_event_frame(&self, event: &SampleEvent) -> Vec<u8> {
    let shape = EventShape {
      evt: "data",
      topic: event.topic.clone(),
      type_name: event.type_name.clone(),
      data: self.registry.sample_to_json(&event.value),
    };
    crate::rpc::encode(&shape).unwrap_or_default()
  }

  fn dispatch(&self, req: RequestShape) -> ResponseShape {
    match req.op.as_str() {
      "hello" => self.handle_hello(),
      "clear" => self.handle_clear(),
      "create" => self.handle_create(req),
      "remove" => self.handle_remove(req),
      "write" => self.handle_write(req),
      "get" => self.handle_get(req),
      "set" => self.handle_set(req),
      _other => ResponseShape::unsupported(),
    }
  }

  /// A static capability catalog: one entry per supported op/target.kind
  /// combination with an example payload, so a UI client can discover
  /// the protocol without out-of-band documentation (spec.md §4.7, S1).
  fn handle_hello(&self) -> ResponseShape {
    ResponseShape::ok_data(serde_json::json!({
      "proto": 1,
      "cap": [
        {"name": "hello", "example": {"op": "hello"}},
        {"name": "clear", "example": {"op": "clear", "target": {"kind": "dds_entities"}}},
        {"name": "create_participant", "example": {
          "op": "create", "target": {"kind": "participant"}, "args": {"domain": 0, "qos": "Lib::Profile"},
        }},
        {"name": "create_publisher", "example": {
          "op": "create", "target": {"kind": "publisher", "domain": 0, "name": "pub1"},
        }},
        {"name": "create_subscriber", "example": {
          "op": "create", "target": {"kind": "subscriber", "domain": 0, "name": "sub1"},
        }},
        {"name": "create_writer", "example": {
          "op": "create", "target": {"kind": "writer", "domain": 0, "publisher": "pub1", "topic": "chat"},
          "args": {"type": "StringMsg"},
        }},
        {"name": "create_reader", "example": {
          "op": "create", "target": {"kind": "reader", "domain": 0, "subscriber": "sub1", "topic": "chat"},
          "args": {"type": "StringMsg"},
        }},
        {"name": "write", "example": {
          "op": "write", "target": {"kind": "writer", "topic": "chat"}, "data": {"text": "Hello world"},
        }},
        {"name": "get_qos", "example": {"op": "get", "target": {"kind": "qos"}, "args": {"include_builtin": true}}},
        {"name": "set_qos", "example": {
          "op": "set", "target": {"kind": "qos"}, "args": {"library": "Lib", "profile": "Profile", "xml": "<...>"},
        }},
      ],
      "ops": ["hello", "clear", "create", "remove", "write", "get", "set"],
      "types": EntityRegistry::KNOWN_TYPES,
    }))
  }

  fn handle_clear(&self) -> ResponseShape {
    self.manager.clear_entities();
    ResponseShape::ok_action("cleared")
  }

  fn handle_create(&self, req: RequestShape) -> ResponseShape {
    let Some(target) = req.target else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("create requires target"));
    };
    let args = req.args.unwrap_or_default();
    let Some(domain) = target.domain.or(args.domain) else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("create requires target.domain"));
    };

    let result = match target.kind.as_str() {
      "participant" => {
        self.manager.create_participant(domain, args.qos.as_deref()).map(|id| ("participant created", id))
      }
      "publisher" => match entity_name(&target, &args) {
        Ok(name) => self.manager.create_publisher(domain, &name, args.qos.as_deref()).map(|id| ("publisher created", id)),
        Err(e) => return ResponseShape::from_dds_error(&e),
      },
      "subscriber" => match entity_name(&target, &args) {
        Ok(name) => {
          self.manager.create_subscriber(domain, &name, args.qos.as_deref()).map(|id| ("subscriber created", id))
        }
        Err(e) => return ResponseShape::from_dds_error(&e),
      },
      "writer" => match writer_reader_fields(&target, &args, "publisher") {
        Ok((owner, topic, type_name)) => self
          .manager
          .create_writer(domain, &owner, &topic, &type_name, args.qos.as_deref())
          .map(|id| ("writer created", id)),
        Err(e) => return ResponseShape::from_dds_error(&e),
      },
      "reader" => match writer_reader_fields(&target, &args, "subscriber") {
        Ok((owner, topic, type_name)) => self
          .manager
          .create_reader(domain, &owner, &topic, &type_name, args.qos.as_deref())
          .map(|id| ("reader created", id)),
        Err(e) => return ResponseShape::from_dds_error(&e),
      },
      _other => return ResponseShape::unsupported(),
    };
    respond(result.map(|(action, id)| ResponseShape::ok_action_with_holder(action, id)))
  }

  fn handle_remove(&self, req: RequestShape) -> ResponseShape {
    let Some(target) = req.target else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("remove requires target"));
    };
    let args = req.args.unwrap_or_default();
    let Some(domain) = target.domain.or(args.domain) else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("remove requires target.domain"));
    };

    let result = match target.kind.as_str() {
      "writer" => match writer_reader_fields(&target, &args, "publisher") {
        Ok((owner, topic, _type_name)) => self.manager.remove_writer(domain, &owner, &topic),
        Err(e) => return ResponseShape::from_dds_error(&e),
      },
      "reader" => match writer_reader_fields(&target, &args, "subscriber") {
        Ok((owner, topic, _type_name)) => self.manager.remove_reader(domain, &owner, &topic),
        Err(e) => return ResponseShape::from_dds_error(&e),
      },
      _other => return ResponseShape::unsupported(),
    };
    respond(result.map(|()| ResponseShape::ok_action("removed")))
  }

  fn handle_write(&self, req: RequestShape) -> ResponseShape {
    let Some(target) = req.target else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("write requires target"));
    };
    let args = req.args.unwrap_or_default();
    let Some(domain) = target.domain.or(args.domain) else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("write requires target.domain"));
    };
    let Some(topic) = target.topic.clone() else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("write requires target.topic"));
    };
    let Some(data) = req.data else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("write requires data"));
    };
    let publisher = target.publisher.clone().or(args.publisher.clone());
    let result = self.manager.publish(domain, publisher.as_deref(), &topic, &data);
    respond(result.map(|()| ResponseShape::ok_action("publish ok")))
  }

  fn handle_get(&self, req: RequestShape) -> ResponseShape {
    let target = req.target.unwrap_or_default();
    let args = req.args.unwrap_or_default();
    match target.kind.as_str() {
      "qos" => {
        let include_builtin = args.include_builtin.unwrap_or(false);
        if args.detail.unwrap_or(false) {
          ResponseShape::ok_data(self.manager.detail_qos_profiles(include_builtin))
        } else {
          ResponseShape::ok_data(serde_json::json!(self.manager.list_qos_profiles(include_builtin)))
        }
      }
      _other => ResponseShape::unsupported(),
    }
  }

  fn handle_set(&self, req: RequestShape) -> ResponseShape {
    let Some(target) = req.target else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("set requires target"));
    };
    let args = req.args.unwrap_or_default();
    let Some(domain) = target.domain.or(args.domain) else {
      return ResponseShape::from_dds_error(&DdsError::missing_tag("set requires target.domain"));
    };
    match target.kind.as_str() {
      "reader" => match writer_reader_fields(&target, &args, "subscriber") {
        Ok((owner, topic, _type_name)) => {
          let processor = self.processor.clone();
          let result = self.manager.set_on_sample(
            domain,
            &owner,
            &topic,
            Arc::new(move |topic, type_name, value| {
              let sequence_id = processor.next_sample_sequence();
              processor.post_sample(SampleEvent {
                topic,
                type_name,
                value,
                received_time: std::time::Instant::now(),
                sequence_id,
              });
            }),
          );
          respond(result.map(|()| ResponseShape::ok_action("sample callback set")))
        }
        Err(e) => ResponseShape::from_dds_error(&e),
      },
      "qos" => match (args.library.clone(), args.profile.clone(), args.xml.clone()) {
        (Some(library), Some(profile), xml) => {
          let origin = xml.unwrap_or_else(|| "<dynamic>".to_string());
          respond(
            self
              .manager
              .add_or_update_qos_profile(&library, &profile, &origin)
              .map(|key| ResponseShape::ok_data(serde_json::json!({"key": key}))),
          )
        }
        _ => ResponseShape::from_dds_error(&DdsError::missing_tag("set qos requires args.library and args.profile")),
      },
      _other => ResponseShape::unsupported(),
    }
  }
}

fn entity_name(target: &TargetShape, args: &ArgsShape) -> Result<String, DdsError> {
  target
    .name
    .clone()
    .or_else(|| args.publisher.clone())
    .or_else(|| args.subscriber.clone())
    .ok_or_else(|| DdsError::missing_tag("create requires target.name"))
}

/// Pulls `(owner, topic, type)` out of a writer/reader create/remove/set
/// request, where `owner_field` is `"publisher"` or `"subscriber"`.
fn writer_reader_fields(
  target: &TargetShape,
  args: &ArgsShape,
  owner_field: &str,
) -> Result<(String, String, String), DdsError> {
  let owner = if owner_field == "publisher" {
    target.publisher.clone().or_else(|| args.publisher.clone())
  } else {
    target.subscriber.clone().or_else(|| args.subscriber.clone())
  }
  .ok_or_else(|| DdsError::missing_tag(format!("request requires target.{owner_field}")))?;

  let topic = target.topic.clone().ok_or_else(|| DdsError::missing_tag("request requires target.topic"))?;

  let type_name = args.type_name.clone().unwrap_or_default();

  Ok((owner, topic, type_name))
}

fn respond(result: Result<ResponseShape, DdsError>) -> ResponseShape {
  match result {
    Ok(resp) => resp,
    Err(e) => ResponseShape::from_dds_error(&e),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{events::Config, manager::DdsManager, qos::QosStore};
  use serde_json::json;

  fn adapter() -> IpcAdapter {
    let manager = Arc::new(DdsManager::new(Arc::new(QosStore::new(std::env::temp_dir()))));
    let (processor, _stop) = AsyncProcessor::start(Config { monitor_sec: 0, ..Config::default() });
    IpcAdapter::new(manager, processor)
  }

  fn req(op: &str, target: Option<TargetShape>, args: Option<ArgsShape>, data: Option<serde_json::Value>) -> Vec<u8> {
    crate::rpc::encode(&RequestShape { op: op.to_string(), target, args, data }).unwrap()
  }

  #[test]
  fn hello_lists_known_types() {
    let adapter = adapter();
    let resp_bytes = adapter.process_request(&req("hello", None, None, None));
    let resp: serde_json::Value = crate::rpc::decode(&resp_bytes).unwrap();
    assert_eq!(resp["ok"], json!(true));
  }

  #[test]
  fn malformed_payload_yields_parse_error_response() {
    let adapter = adapter();
    let resp_bytes = adapter.process_request(&[0xff, 0xff, 0xff]);
    let resp: serde_json::Value = crate::rpc::decode(&resp_bytes).unwrap();
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["err_kind"], json!("parse"));
  }

  #[test]
  fn create_writer_then_remove_round_trips_ok() {
    let adapter = adapter();
    let target = TargetShape {
      kind: "writer".to_string(),
      domain: Some(0),
      publisher: Some("pub1".to_string()),
      topic: Some("t".to_string()),
      ..Default::default()
    };
    let args = ArgsShape { type_name: Some("StringMsg".to_string()), ..Default::default() };
    let resp_bytes = adapter.process_request(&req("create", Some(target.clone()), Some(args), None));
    let resp: serde_json::Value = crate::rpc::decode(&resp_bytes).unwrap();
    assert_eq!(resp["ok"], json!(true));
    assert!(resp["result"]["holder_id"].is_number());

    let resp_bytes = adapter.process_request(&req("remove", Some(target), None, None));
    let resp: serde_json::Value = crate::rpc::decode(&resp_bytes).unwrap();
    assert_eq!(resp["ok"], json!(true));
  }

  #[test]
  fn duplicate_create_reports_logic_category() {
    let adapter = adapter();
    let target = TargetShape {
      kind: "writer".to_string(),
      domain: Some(0),
      publisher: Some("pub1".to_string()),
      topic: Some("t".to_string()),
      ..Default::default()
    };
    let args = ArgsShape { type_name: Some("StringMsg".to_string()), ..Default::default() };
    adapter.process_request(&req("create", Some(target.clone()), Some(args.clone()), None));
    let resp_bytes = adapter.process_request(&req("create", Some(target), Some(args), None));
    let resp: serde_json::Value = crate::rpc::decode(&resp_bytes).unwrap();
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["category"], json!(1));
  }
}
