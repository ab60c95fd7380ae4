//! An in-process stand-in for the pub/sub data-distribution runtime that
//! the original gateway bridges to.
//!
//! The real runtime (participants, publishers/subscribers, readers and
//! writers that move samples between processes over RTPS) is an external
//! collaborator this crate does not implement — see SPEC_FULL.md's
//! non-goals. What the manager and IPC adapter need from it is a narrow
//! surface: create entities that can fail (so QoS fallback has something
//! to fall back from), and move typed samples from a writer to every
//! matching reader in the same process. [`Bus`] and the handle types
//! below provide exactly that surface, built the way the teacher wraps
//! its own RTPS entities in `Arc<Mutex<..>>` handles.
//!
//! A [`QosSettings`] here is just a `library::profile` key threaded
//! through from the caller; construction "fails" when that key starts
//! with `fail::`, which is the hook the manager's fallback-to-default
//! logic and its tests rely on (no real QoS semantics are modeled).

use std::{
  any::{Any, TypeId},
  collections::HashMap,
  fmt,
  sync::{Arc, Mutex, RwLock},
};

/// Opaque QoS selector threaded down from the manager. Only the `fail::`
/// prefix has any behavior; everything else is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QosSettings {
  pub profile_key: Option<String>,
}

impl QosSettings {
  pub fn named(profile_key: impl Into<String>) -> Self {
    QosSettings { profile_key: Some(profile_key.into()) }
  }

  fn should_fail(&self) -> bool {
    matches!(&self.profile_key, Some(key) if key.starts_with("fail::"))
  }
}

/// Failure from the simulated runtime — the Rust analogue of a DDS entity
/// factory returning null.
#[derive(Debug, Clone, thiserror::Error)]
#[error("runtime failed to construct entity with profile {profile:?}")]
pub struct RuntimeError {
  pub profile: Option<String>,
}

impl RuntimeError {
  fn from_qos(qos: Option<&QosSettings>) -> Self {
    RuntimeError { profile: qos.and_then(|q| q.profile_key.clone()) }
  }
}

type Subscription = (TypeId, Arc<dyn Fn(&dyn Any) + Send + Sync>);

/// Process-wide routing table from `(domain_id, topic_name)` to the
/// subscriber callbacks currently listening on it. Constructed once by
/// the gateway at startup and shared by `Arc` clone into every
/// [`DomainParticipant`] — not a global or a `static`, per the design
/// notes' prohibition on ambient mutable singletons.
#[derive(Default)]
pub struct Bus {
  routes: RwLock<HashMap<(i32, String), Vec<Subscription>>>,
}

impl Bus {
  pub fn new() -> Arc<Bus> {
    Arc::new(Bus { routes: RwLock::new(HashMap::new()) })
  }

  fn subscribe<T: Send + 'static>(
    &self,
    domain_id: i32,
    topic: &str,
    callback: Arc<dyn Fn(&T) + Send + Sync>,
  ) {
    let erased: Arc<dyn Fn(&dyn Any) + Send + Sync> = Arc::new(move |value: &dyn Any| {
      if let Some(v) = value.downcast_ref::<T>() {
        callback(v);
      }
    });
    self
      .routes
      .write()
      .expect("bus routes lock poisoned")
      .entry((domain_id, topic.to_string()))
      .or_default()
      .push((TypeId::of::<T>(), erased));
  }

  fn publish<T: Send + 'static>(&self, domain_id: i32, topic: &str, value: &T) {
    let routes = self.routes.read().expect("bus routes lock poisoned");
    if let Some(subs) = routes.get(&(domain_id, topic.to_string())) {
      for (type_id, cb) in subs {
        if *type_id == TypeId::of::<T>() {
          cb(value as &dyn Any);
        }
      }
    }
  }
}

/// A participant in one domain. Cheap to clone; all clones share the same
/// bus handle and domain id.
#[derive(Clone)]
pub struct DomainParticipant {
  bus: Arc<Bus>,
  domain_id: i32,
}

impl fmt::Debug for DomainParticipant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DomainParticipant").field("domain_id", &self.domain_id).finish()
  }
}

impl DomainParticipant {
  pub fn new(bus: Arc<Bus>, domain_id: i32, qos: Option<&QosSettings>) -> Result<Self, RuntimeError> {
    if qos.map_or(false, QosSettings::should_fail) {
      return Err(RuntimeError::from_qos(qos));
    }
    Ok(DomainParticipant { bus, domain_id })
  }

  pub fn domain_id(&self) -> i32 {
    self.domain_id
  }

  pub fn create_publisher(&self, qos: Option<&QosSettings>) -> Result<Publisher, RuntimeError> {
    if qos.map_or(false, QosSettings::should_fail) {
      return Err(RuntimeError::from_qos(qos));
    }
    Ok(Publisher { bus: Arc::clone(&self.bus), domain_id: self.domain_id })
  }

  pub fn create_subscriber(&self, qos: Option<&QosSettings>) -> Result<Subscriber, RuntimeError> {
    if qos.map_or(false, QosSettings::should_fail) {
      return Err(RuntimeError::from_qos(qos));
    }
    Ok(Subscriber { bus: Arc::clone(&self.bus), domain_id: self.domain_id })
  }

  /// Create (or logically reuse) a topic. There is no shared registry to
  /// reuse here, because topic identity and the single type binding per
  /// (domain, topic) are already enforced a layer up, by the manager.
  pub fn create_topic(
    &self,
    name: impl Into<String>,
    type_name: impl Into<String>,
    qos: Option<&QosSettings>,
  ) -> Result<Topic, RuntimeError> {
    if qos.map_or(false, QosSettings::should_fail) {
      return Err(RuntimeError::from_qos(qos));
    }
    Ok(Topic { domain_id: self.domain_id, name: name.into(), type_name: type_name.into() })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
  pub domain_id: i32,
  pub name: String,
  pub type_name: String,
}

#[derive(Clone)]
pub struct Publisher {
  bus: Arc<Bus>,
  domain_id: i32,
}

impl Publisher {
  pub fn create_datawriter<T: Send + 'static>(
    &self,
    topic: &Topic,
    qos: Option<&QosSettings>,
  ) -> Result<DataWriter<T>, RuntimeError> {
    if qos.map_or(false, QosSettings::should_fail) {
      return Err(RuntimeError::from_qos(qos));
    }
    Ok(DataWriter {
      bus: Arc::clone(&self.bus),
      domain_id: self.domain_id,
      topic_name: topic.name.clone(),
      _marker: std::marker::PhantomData,
    })
  }
}

#[derive(Clone)]
pub struct Subscriber {
  bus: Arc<Bus>,
  domain_id: i32,
}

impl Subscriber {
  pub fn create_datareader<T: Send + 'static>(
    &self,
    topic: &Topic,
    qos: Option<&QosSettings>,
  ) -> Result<DataReader<T>, RuntimeError> {
    if qos.map_or(false, QosSettings::should_fail) {
      return Err(RuntimeError::from_qos(qos));
    }
    Ok(DataReader {
      bus: Arc::clone(&self.bus),
      domain_id: self.domain_id,
      topic_name: topic.name.clone(),
      _marker: std::marker::PhantomData,
    })
  }
}

pub struct DataWriter<T> {
  bus: Arc<Bus>,
  domain_id: i32,
  topic_name: String,
  _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: Send + 'static> DataWriter<T> {
  pub fn write(&self, value: &T) -> Result<(), RuntimeError>
  where
    T: Clone,
  {
    self.bus.publish(self.domain_id, &self.topic_name, value);
    Ok(())
  }
}

pub struct DataReader<T> {
  bus: Arc<Bus>,
  domain_id: i32,
  topic_name: String,
  _marker: std::marker::PhantomData<fn(T)>,
}

impl<T: Send + 'static> DataReader<T> {
  pub fn set_sample_callback(&self, callback: impl Fn(&T) + Send + Sync + 'static) {
    self.bus.subscribe::<T>(self.domain_id, &self.topic_name, Arc::new(callback));
  }
}
