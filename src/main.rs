// Nochistlán Marketplace - community listings for items, jobs and rentals
// Copyright (C) 2025 Marketplace Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Marketplace Core - background process for the Nochistlán marketplace UI
//!
//! Serves the UI over a local socket (a named pipe on Windows) using the JSON
//! IPC protocol and talks to the hosted backend on its behalf.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use marketplace_core::api::{DocumentAnalyzer, GeminiClient, SupabaseClient};
use marketplace_core::cache::CacheManager;
use marketplace_core::config::Config;
use marketplace_core::events::EventForwarder;
use marketplace_core::ipc::{AppState, IpcServer, MessageHandler};
use marketplace_core::logger::{Logger, LoggerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;

    Logger::init_with_config(LoggerConfig::for_dir(config.log_dir()))?;

    info!("Marketplace Core starting up...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // The cache only holds the welcome flag and the saved session
    let cache = match CacheManager::new(&config.cache_db_path()).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!("Cache unavailable, continuing without it: {}", e);
            None
        }
    };

    let backend = Arc::new(SupabaseClient::from_config(&config)?);
    let analyzer: Option<Arc<dyn DocumentAnalyzer>> = match GeminiClient::from_config(&config)? {
        Some(client) => Some(Arc::new(client)),
        None => {
            warn!("GEMINI_API_KEY is not set; identity verification is disabled");
            None
        }
    };

    let state = AppState::with_backend(backend, analyzer, cache, config.buckets.clone());

    match state.session.restore().await {
        Ok(Some(user)) => info!("Restored session for {}", user.id),
        Ok(None) => info!("No saved session"),
        Err(e) => warn!("Could not restore the saved session: {}", e),
    }

    let forwarder = Arc::new(EventForwarder::new(
        state.session.clone(),
        state.verification.clone(),
    ));
    let (shutdown_tx, _) = broadcast::channel(1);
    let handler = Arc::new(MessageHandler::new(state, shutdown_tx.clone()));
    let server = Arc::new(IpcServer::new(
        config.ipc_path.clone(),
        handler,
        forwarder,
        shutdown_tx,
    ));

    let ctrl_c_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            ctrl_c_server.shutdown();
        }
    });

    match server.run().await {
        Ok(()) => {
            info!("Marketplace Core shutting down gracefully");
        }
        Err(e) => {
            error!("Fatal error in IPC server: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
