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

//! Event forwarding to connected UI clients
//!
//! Session changes and verification progress are broadcast inside the core.
//! Each client connection takes an `EventSubscription` and turns those
//! broadcasts into IPC event messages until the client goes away or the
//! server shuts down.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::AppResult;
use crate::log_ipc;
use crate::models::{events, AuthEvent, IpcMessage, VerificationStage};
use crate::session::SessionContext;
use crate::verification::VerificationService;

/// Something the UI should hear about without asking
#[derive(Debug, Clone)]
pub enum CoreEvent {
    Session(AuthEvent),
    Verification(VerificationStage),
}

impl CoreEvent {
    pub fn method(&self) -> &'static str {
        match self {
            CoreEvent::Session(_) => events::SESSION_CHANGED,
            CoreEvent::Verification(_) => events::VERIFICATION_PROGRESS,
        }
    }

    pub fn into_message(self) -> AppResult<IpcMessage> {
        let method = self.method();
        let params = match self {
            CoreEvent::Session(event) => serde_json::to_value(&event)?,
            CoreEvent::Verification(stage) => serde_json::json!({
                "stage": stage,
                "message": stage.status_message(),
            }),
        };
        Ok(IpcMessage::event(method, params))
    }
}

/// Hands out per-connection subscriptions and stops them all on shutdown
pub struct EventForwarder {
    session: Arc<SessionContext>,
    verification: Arc<VerificationService>,
    shutdown_tx: broadcast::Sender<()>,
}

impl EventForwarder {
    pub fn new(session: Arc<SessionContext>, verification: Arc<VerificationService>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            session,
            verification,
            shutdown_tx,
        }
    }

    /// Subscribe now; events emitted after this call are delivered
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            session_rx: self.session.subscribe(),
            progress_rx: self.verification.subscribe_progress(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        }
    }

    /// Stop every running subscription
    pub fn stop_all(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

pub struct EventSubscription {
    session_rx: broadcast::Receiver<AuthEvent>,
    progress_rx: broadcast::Receiver<VerificationStage>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl EventSubscription {
    /// Push events into `event_tx` until shutdown or until its receiver is dropped
    pub async fn forward(mut self, event_tx: mpsc::Sender<IpcMessage>) {
        info!("Event forwarding started");

        loop {
            let event = tokio::select! {
                received = self.session_rx.recv() => match received {
                    Ok(event) => CoreEvent::Session(event),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Event subscriber lagged, {} session event(s) dropped", missed);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                received = self.progress_rx.recv() => match received {
                    Ok(stage) => CoreEvent::Verification(stage),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Event subscriber lagged, {} progress event(s) dropped", missed);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping event forwarding");
                    break;
                }
                _ = event_tx.closed() => {
                    debug!("Client went away, stopping event forwarding");
                    break;
                }
            };

            let method = event.method();
            let message = match event.into_message() {
                Ok(message) => message,
                Err(e) => {
                    warn!("Could not encode {} event: {}", method, e);
                    continue;
                }
            };

            if event_tx.send(message).await.is_err() {
                break;
            }
            log_ipc!(event, method);
        }
    }
}
