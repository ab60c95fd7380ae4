//! Binary entry point: load configuration, initialize logging, start the
//! gateway, and run until Ctrl-C — the Rust counterpart of the original
//! `main.cpp`.

use std::{
  env,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::Duration,
};

use rtpdds_gateway::{config::GatewayConfig, gateway::GatewayApp};

fn main() {
  let config_path = env::args().nth(1).unwrap_or_else(|| "gateway.toml".to_string());
  let config = match GatewayConfig::load(&config_path) {
    Ok(config) => config,
    Err(e) => {
      eprintln!("failed to load config {config_path}: {e}");
      std::process::exit(1);
    }
  };

  init_logging(&config.logging);

  let mut app = GatewayApp::new(&config);
  if let Err(e) = app.start(&config) {
    log::error!("failed to start gateway: {e}");
    std::process::exit(1);
  }
  log::info!("gateway listening on {}:{}", config.network.bind, config.network.port);

  run_until_signal();
  app.stop();
}

fn init_logging(logging: &rtpdds_gateway::config::LoggingConfig) {
  let mut builder = env_logger::Builder::new();
  builder.parse_filters(&logging.level);
  if !logging.console {
    builder.target(env_logger::Target::Pipe(Box::new(std::io::sink())));
  }
  builder.init();
}

/// Blocks until SIGINT (Ctrl-C), then returns so the caller can shut the
/// gateway down in an orderly fashion instead of exiting mid-request.
fn run_until_signal() {
  let running = Arc::new(AtomicBool::new(true));
  let handler_flag = Arc::clone(&running);
  ctrlc::set_handler(move || {
    handler_flag.store(false, Ordering::SeqCst);
  })
  .expect("installing the Ctrl-C handler should not fail");

  while running.load(Ordering::SeqCst) {
    std::thread::sleep(Duration::from_millis(200));
  }
}
