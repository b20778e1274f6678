// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CLI entry point: loads configuration, binds the admitter, and blocks
//! until a shutdown signal arrives.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use vellum::config::Config;
use vellum::server::Server;

fn main() -> ExitCode {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("vellum.conf"));

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load configuration from {}: {e}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port);
    let mut server = match Server::bind(addr, config) {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to bind {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = install_signal_handlers(Arc::clone(&shutdown)) {
        log::error!("failed to install signal handlers: {e}");
        return ExitCode::FAILURE;
    }

    server.run(&shutdown);
    ExitCode::SUCCESS
}

/// Wires the interactive-interrupt and terminate signals to a flag the
/// admitter's accept loop polls, rather than hand-rolling `libc::signal`
/// plumbing.
fn install_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        log::info!("received shutdown signal, initiating graceful shutdown");
        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    })
}
