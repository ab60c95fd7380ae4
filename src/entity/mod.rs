//! Type-erased sample carrier and entity registry.
//!
//! The original `sample_factory.hpp` keeps a table of function pointers
//! keyed by type name, each entry knowing how to build a writer/reader
//! for its schema and how to project a sample to and from JSON. Rust's
//! type system makes the literal "table of heterogeneous closures"
//! awkward to express safely; the idiomatic equivalent used here is an
//! [`AnyValue`] enum with one variant per registered schema, matched on
//! inside [`EntityRegistry`] — the same "registered once, read-only,
//! shared" shape, without `dyn Any` downcasting at the call sites that
//! actually move samples.

pub mod schemas;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::{
  error::DdsError,
  runtime::{self, DataReader, DataWriter, Publisher, QosSettings, RuntimeError, Subscriber, Topic},
};

use schemas::{AlarmMsg, StringMsg};

/// A sample of one of the registered schemas, carried generically through
/// the manager and IPC adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyValue {
  StringMsg(StringMsg),
  AlarmMsg(AlarmMsg),
}

impl AnyValue {
  pub fn type_name(&self) -> &'static str {
    match self {
      AnyValue::StringMsg(_) => "StringMsg",
      AnyValue::AlarmMsg(_) => "AlarmMsg",
    }
  }
}

/// The callback signature handed to a reader: topic name, type name, and
/// the decoded sample, mirroring `set_on_sample`'s `(topic, type, json)`
/// shape in the original adapter.
pub type SampleCallback = Arc<dyn Fn(String, String, AnyValue) + Send + Sync>;

/// A type-erased writer handle. One variant per registered schema, so
/// `write` can be called without the caller knowing which concrete type
/// backs this topic.
pub enum WriterHolder {
  StringMsg(DataWriter<StringMsg>),
  AlarmMsg(DataWriter<AlarmMsg>),
}

impl WriterHolder {
  pub fn write(&self, value: &AnyValue) -> Result<(), DdsError> {
    match (self, value) {
      (WriterHolder::StringMsg(w), AnyValue::StringMsg(v)) => {
        w.write(v).map_err(runtime_error_to_dds)
      }
      (WriterHolder::AlarmMsg(w), AnyValue::AlarmMsg(v)) => {
        w.write(v).map_err(runtime_error_to_dds)
      }
      _ => Err(DdsError::logic(format!(
        "type mismatch: writer expects {}, got {}",
        self.type_name(),
        value.type_name()
      ))),
    }
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      WriterHolder::StringMsg(_) => "StringMsg",
      WriterHolder::AlarmMsg(_) => "AlarmMsg",
    }
  }
}

/// A type-erased reader handle.
pub enum ReaderHolder {
  StringMsg(DataReader<StringMsg>),
  AlarmMsg(DataReader<AlarmMsg>),
}

impl ReaderHolder {
  pub fn type_name(&self) -> &'static str {
    match self {
      ReaderHolder::StringMsg(_) => "StringMsg",
      ReaderHolder::AlarmMsg(_) => "AlarmMsg",
    }
  }

  /// Install the sample callback, wrapping it so the caller only ever
  /// deals in [`AnyValue`].
  pub fn set_sample_callback(&self, topic: String, callback: SampleCallback) {
    let type_name = self.type_name();
    match self {
      ReaderHolder::StringMsg(r) => {
        let topic = topic.clone();
        r.set_sample_callback(move |v: &StringMsg| {
          callback(topic.clone(), type_name.to_string(), AnyValue::StringMsg(v.clone()))
        });
      }
      ReaderHolder::AlarmMsg(r) => {
        let topic = topic.clone();
        r.set_sample_callback(move |v: &AlarmMsg| {
          callback(topic.clone(), type_name.to_string(), AnyValue::AlarmMsg(v.clone()))
        });
      }
    }
  }
}

fn runtime_error_to_dds(err: RuntimeError) -> DdsError {
  DdsError::resource(format!("runtime entity construction failed: {err}"))
}

/// The set of schemas this gateway knows how to move samples for. Built
/// once at startup (`EntityRegistry::new`) and shared read-only
/// afterwards — no dynamic registration, matching spec.md's closed set
/// of known types.
#[derive(Clone, Copy)]
pub struct EntityRegistry;

impl EntityRegistry {
  pub fn new() -> EntityRegistry {
    EntityRegistry
  }

  pub const KNOWN_TYPES: &'static [&'static str] = &["StringMsg", "AlarmMsg"];

  pub fn is_registered(&self, type_name: &str) -> bool {
    Self::KNOWN_TYPES.contains(&type_name)
  }

  pub fn create_writer(
    &self,
    type_name: &str,
    publisher: &Publisher,
    topic: &Topic,
    qos: Option<&QosSettings>,
  ) -> Result<WriterHolder, RuntimeError> {
    match type_name {
      "StringMsg" => publisher.create_datawriter::<StringMsg>(topic, qos).map(WriterHolder::StringMsg),
      "AlarmMsg" => publisher.create_datawriter::<AlarmMsg>(topic, qos).map(WriterHolder::AlarmMsg),
      other => panic!("create_writer called with unregistered type {other}"),
    }
  }

  pub fn create_reader(
    &self,
    type_name: &str,
    subscriber: &Subscriber,
    topic: &Topic,
    qos: Option<&QosSettings>,
  ) -> Result<ReaderHolder, RuntimeError> {
    match type_name {
      "StringMsg" => subscriber.create_datareader::<StringMsg>(topic, qos).map(ReaderHolder::StringMsg),
      "AlarmMsg" => subscriber.create_datareader::<AlarmMsg>(topic, qos).map(ReaderHolder::AlarmMsg),
      other => panic!("create_reader called with unregistered type {other}"),
    }
  }

  /// Project a CBOR/JSON payload into a typed sample (spec.md §4.1's
  /// `data{...}` object). Used by the IPC adapter on `write` requests.
  pub fn sample_from_json(&self, type_name: &str, json: &JsonValue) -> Result<AnyValue, String> {
    match type_name {
      "StringMsg" => serde_json::from_value::<StringMsg>(json.clone())
        .map(AnyValue::StringMsg)
        .map_err(|e| e.to_string()),
      "AlarmMsg" => serde_json::from_value::<AlarmMsg>(json.clone())
        .map(AnyValue::AlarmMsg)
        .map_err(|e| e.to_string()),
      other => Err(format!("unregistered type {other}")),
    }
  }

  pub fn sample_to_json(&self, value: &AnyValue) -> JsonValue {
    match value {
      AnyValue::StringMsg(v) => serde_json::to_value(v).expect("StringMsg always serializes"),
      AnyValue::AlarmMsg(v) => serde_json::to_value(v).expect("AlarmMsg always serializes"),
    }
  }
}

impl Default for EntityRegistry {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::runtime::{Bus, DomainParticipant};
  use serde_json::json;

  #[test]
  fn sample_from_json_round_trips_string_msg() {
    let registry = EntityRegistry::new();
    let json = json!({"text": "hello"});
    let value = registry.sample_from_json("StringMsg", &json).unwrap();
    assert_eq!(value, AnyValue::StringMsg(StringMsg { text: "hello".to_string() }));
    assert_eq!(registry.sample_to_json(&value), json);
  }

  #[test]
  fn sample_from_json_rejects_unregistered_type() {
    let registry = EntityRegistry::new();
    assert!(registry.sample_from_json("Unknown", &json!({})).is_err());
  }

  #[test]
  fn writer_rejects_mismatched_sample_type() {
    let bus = Bus::new();
    let dp = DomainParticipant::new(bus, 0, None).unwrap();
    let publisher = dp.create_publisher(None).unwrap();
    let topic = dp.create_topic("alarms", "AlarmMsg", None).unwrap();
    let registry = EntityRegistry::new();
    let writer = registry.create_writer("AlarmMsg", &publisher, &topic, None).unwrap();
    let err = writer.write(&AnyValue::StringMsg(StringMsg { text: "x".into() })).unwrap_err();
    assert_eq!(err.category, crate::error::DdsErrorCategory::Logic);
  }
}
