//! Wires the manager, IPC adapter, event processor and transport
//! together into one running gateway, the Rust counterpart of the
//! original `Gateway` class in `gateway.cpp`.
//!
//! Startup order: the event processor is started first (so there is
//! somewhere for the transport's receive thread to hand frames off to
//! the instant it comes up), then the transport binds or connects.
//! Shutdown runs in the opposite spirit but not the exact mirror image:
//! the processor is told to stop (and, per its `drain_stop` config,
//! finishes whatever is already queued) before the transport's receive
//! thread is stopped and joined, so a response already computed for an
//! in-flight request still has a transport to send through.

use std::{io, net::SocketAddr, thread::JoinHandle};

use crate::{
  config::GatewayConfig,
  events::{self, AsyncProcessor, CommandEvent, Handlers},
  ipc::IpcAdapter,
  manager::DdsManager,
  qos::QosStore,
  transport::{Callbacks, Endpoint, Role, Transport},
};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("transport failed to start: {0}")]
  Transport(#[from] io::Error),
}

pub struct GatewayApp {
  manager: Arc<DdsManager>,
  adapter: IpcAdapter,
  processor: AsyncProcessor,
  processor_stop: Option<Box<dyn FnOnce() + Send>>,
  transport: Option<Transport>,
  transport_handle: Option<JoinHandle<()>>,
}

impl GatewayApp {
  pub fn new(config: &GatewayConfig) -> GatewayApp {
    let qos_store = Arc::new(QosStore::new(config.dds.qos_dir.clone()));
    let manager = Arc::new(DdsManager::new(qos_store));
    let (processor, stop) = AsyncProcessor::start(events::Config::default());
    let adapter = IpcAdapter::new(Arc::clone(&manager), processor.clone());
    GatewayApp {
      manager,
      adapter,
      processor,
      processor_stop: Some(Box::new(stop)),
      transport: None,
      transport_handle: None,
    }
  }

  pub fn manager(&self) -> &Arc<DdsManager> {
    &self.manager
  }

  /// Bind (server) or connect (client) the transport and wire every
  /// callback. Safe to call at most once per `GatewayApp`.
  pub fn start(&mut self, config: &GatewayConfig) -> Result<(), GatewayError> {
    let endpoint = Endpoint::new(config.network.bind.clone(), config.network.port);
    let role: Role = config.network.role.clone().into();
    let (transport, handle) = Transport::start(role, &endpoint)?;

    let command_sink = self.processor.clone();
    transport.set_callbacks(Callbacks {
      on_request: Some(Box::new(move |header, payload| {
        command_sink.post_command(CommandEvent {
          corr_id: header.corr_id,
          route: "ipc".to_string(),
          payload: payload.to_vec(),
          received_time: std::time::Instant::now(),
        });
      })),
      ..Default::default()
    });

    let adapter_for_commands = self.adapter.clone();
    let transport_for_commands = transport.clone();
    let adapter_for_samples = self.adapter.clone();
    let transport_for_samples = transport.clone();
    self.processor.set_handlers(Handlers {
      on_command: Some(Box::new(move |event| {
        let response = adapter_for_commands.process_request(&event.payload);
        if let Err(e) = transport_for_commands.send(crate::frame::FrameType::Rsp, event.corr_id, &response) {
          log::warn!("failed to send response for corr_id {}: {e}", event.corr_id);
        }
      })),
      on_sample: Some(Box::new(move |event| {
        let payload = adapter_for_samples.emit_event_frame(&event);
        if let Err(e) = transport_for_samples.send(crate::frame::FrameType::Evt, 0, &payload) {
          log::warn!("failed to send event for topic {}: {e}", event.topic);
        }
      })),
      on_error: Some(Box::new(|event| log::error!("{}: {}", event.origin, event.what))),
    });

    self.transport = Some(transport);
    self.transport_handle = Some(handle);
    Ok(())
  }

  pub fn last_peer(&self) -> Option<SocketAddr> {
    self.transport.as_ref().and_then(|t| t.last_peer())
  }

  /// Drain the event processor, then stop and join the transport's
  /// receive thread. Idempotent.
  pub fn stop(&mut self) {
    if let Some(stop) = self.processor_stop.take() {
      stop();
    }
    if let Some(transport) = &self.transport {
      transport.stop();
    }
    if let Some(handle) = self.transport_handle.take() {
      let _ = handle.join();
    }
    self.log_final_stats();
  }

  fn log_final_stats(&self) {
    if let Some(transport) = &self.transport {
      let (received, rejected, sent) = transport.stats().snapshot();
      log::info!("transport stats: received={received} rejected={rejected} sent={sent}");
    }
    let snap = self.processor.stats().snapshot();
    log::info!(
      "event processor stats: exec_jobs={} dropped={} max_depth={}",
      snap.exec_jobs,
      snap.dropped,
      snap.max_depth
    );
  }
}

/// Decode an EVT payload's `data` field back into a typed sample, used
/// only by tests driving the gateway end to end without a transport.
#[cfg(test)]
pub(crate) fn decode_event_value(
  type_name: &str,
  registry: &crate::entity::EntityRegistry,
  bytes: &[u8],
) -> crate::entity::AnyValue {
  let shape: crate::rpc::EventShape = crate::rpc::decode(bytes).expect("well-formed event frame");
  registry.sample_from_json(type_name, &shape.data).expect("matching schema decodes")
}
