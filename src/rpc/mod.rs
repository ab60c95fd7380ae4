//! The CBOR-encoded request/response envelope carried inside REQ/RSP
//! frame payloads (spec.md §4.1). Field shapes are deliberately loose
//! (`Option` almost everywhere) because a single `op` only uses a subset
//! of `target`/`args`/`data` — the adapter validates per-op, not serde.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{BoundaryError, DdsError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetShape {
  pub kind: String,
  #[serde(default)]
  pub domain: Option<i32>,
  #[serde(default)]
  pub publisher: Option<String>,
  #[serde(default)]
  pub subscriber: Option<String>,
  #[serde(default)]
  pub topic: Option<String>,
  #[serde(default)]
  pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgsShape {
  #[serde(default)]
  pub domain: Option<i32>,
  #[serde(default)]
  pub publisher: Option<String>,
  #[serde(default)]
  pub subscriber: Option<String>,
  #[serde(default)]
  pub qos: Option<String>,
  #[serde(default, rename = "type")]
  pub type_name: Option<String>,
  #[serde(default)]
  pub include_builtin: Option<bool>,
  #[serde(default)]
  pub detail: Option<bool>,
  #[serde(default)]
  pub library: Option<String>,
  #[serde(default)]
  pub profile: Option<String>,
  #[serde(default)]
  pub xml: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestShape {
  pub op: String,
  #[serde(default)]
  pub target: Option<TargetShape>,
  #[serde(default)]
  pub args: Option<ArgsShape>,
  #[serde(default)]
  pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseShape {
  pub ok: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub err: Option<i32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub category: Option<i32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub msg: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub err_kind: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub fail_detail: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
}

impl ResponseShape {
  /// `{ok:true, result:{action}}` — no extra fields beyond the action
  /// name (spec.md §3's `ResponseShape`).
  pub fn ok_action(action: &str) -> ResponseShape {
    ResponseShape { ok: true, result: Some(serde_json::json!({"action": action})), ..Default::default() }
  }

  /// `{ok:true, result:{action, holder_id}}`, used by every `create`
  /// that allocates a holder id.
  pub fn ok_action_with_holder(action: &str, holder_id: u64) -> ResponseShape {
    ResponseShape {
      ok: true,
      result: Some(serde_json::json!({"action": action, "holder_id": holder_id})),
      ..Default::default()
    }
  }

  /// `{ok:true, result:<data>}` for ops whose payload isn't shaped
  /// around a single `action` string (`hello`, `get`).
  pub fn ok_data(data: serde_json::Value) -> ResponseShape {
    ResponseShape { ok: true, result: Some(data), ..Default::default() }
  }

  /// A `DdsError` surfacing out of the manager (spec.md §7: `err:4,
  /// category:1` for `Logic`, `err:4, category:2` for `Resource`,
  /// `err:6` in place of 4 when the error marks a missing required tag).
  pub fn from_dds_error(e: &DdsError) -> ResponseShape {
    ResponseShape {
      ok: false,
      err: Some(e.wire_err_code()),
      category: Some(e.category_code()),
      msg: Some(e.message.clone()),
      ..Default::default()
    }
  }

  /// A boundary failure (`parse` or `internal`), both `err:7` but
  /// distinguished by `err_kind` (spec.md §4.7 points 1 and 4).
  pub fn from_boundary_error(e: &BoundaryError) -> ResponseShape {
    ResponseShape {
      ok: false,
      err: Some(7),
      err_kind: Some(e.err_kind().to_string()),
      fail_detail: Some(e.detail().to_string()),
      source: matches!(e, BoundaryError::Parse(_)).then(|| "agent".to_string()),
      ..Default::default()
    }
  }

  /// A dispatch table miss: unknown `op`, `target.kind`, or required
  /// args absent for a combination that otherwise parsed fine
  /// (spec.md §4.7 point 3, literal message).
  pub fn unsupported() -> ResponseShape {
    ResponseShape { ok: false, err: Some(4), msg: Some("unsupported or failed".to_string()), ..Default::default() }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventShape {
  pub evt: &'static str,
  pub topic: String,
  #[serde(rename = "type")]
  pub type_name: String,
  pub data: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
  #[error("failed to encode CBOR payload: {0}")]
  Encode(String),
  #[error("failed to decode CBOR payload: {0}")]
  Decode(String),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
  let mut buf = Vec::new();
  ciborium::ser::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
  Ok(buf)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
  ciborium::de::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn request_round_trips_through_cbor() {
    let req = RequestShape {
      op: "create".to_string(),
      target: Some(TargetShape { kind: "writer".to_string(), domain: Some(0), ..Default::default() }),
      args: Some(ArgsShape { type_name: Some("StringMsg".to_string()), ..Default::default() }),
      data: Some(json!({"text": "hi"})),
    };
    let bytes = encode(&req).unwrap();
    let decoded: RequestShape = decode(&bytes).unwrap();
    assert_eq!(decoded.op, "create");
    assert_eq!(decoded.target.unwrap().domain, Some(0));
    assert_eq!(decoded.args.unwrap().type_name.as_deref(), Some("StringMsg"));
  }

  #[test]
  fn boundary_parse_error_carries_literal_fields() {
    let resp = ResponseShape::from_boundary_error(&BoundaryError::Parse("bad bytes".to_string()));
    assert!(!resp.ok);
    assert_eq!(resp.err, Some(7));
    assert_eq!(resp.err_kind.as_deref(), Some("parse"));
    assert_eq!(resp.source.as_deref(), Some("agent"));
    assert_eq!(resp.fail_detail.as_deref(), Some("bad bytes"));
    assert!(resp.result.is_none());
  }

  #[test]
  fn dds_error_maps_to_numeric_err_and_category() {
    let resp = ResponseShape::from_dds_error(&DdsError::logic("topic already bound"));
    assert_eq!(resp.err, Some(4));
    assert_eq!(resp.category, Some(1));
    assert_eq!(resp.msg.as_deref(), Some("topic already bound"));

    let missing = ResponseShape::from_dds_error(&DdsError::missing_tag("missing target.topic"));
    assert_eq!(missing.err, Some(6));
  }

  #[test]
  fn decode_rejects_malformed_bytes() {
    let err = decode::<RequestShape>(&[0xff, 0x00, 0x01]).unwrap_err();
    assert!(matches!(err, CodecError::Decode(_)));
  }
}
