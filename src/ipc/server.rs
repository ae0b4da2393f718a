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

//! IPC server: newline-delimited JSON over a Unix socket or a Windows named pipe

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::events::EventForwarder;
use crate::models::{error_codes, IpcError, IpcMessage};

use super::handler::MessageHandler;

/// Events queued for one client before the forwarder waits
const EVENT_QUEUE: usize = 64;

/// IPC server that listens for connections from the UI
pub struct IpcServer {
    path: String,
    handler: Arc<MessageHandler>,
    forwarder: Arc<EventForwarder>,
    shutdown_tx: broadcast::Sender<()>,
}

impl IpcServer {
    /// `shutdown_tx` must be the sender the handler signals on `shutdown`
    pub fn new(
        path: impl Into<String>,
        handler: Arc<MessageHandler>,
        forwarder: Arc<EventForwarder>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            path: path.into(),
            handler,
            forwarder,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Accept clients until shutdown is signalled
    pub async fn run(&self) -> Result<()> {
        info!("Starting IPC server on {}", self.path);

        let result = self.listen(self.shutdown_signal()).await;
        self.forwarder.stop_all();
        result
    }

    #[cfg(not(windows))]
    async fn listen(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        use tokio::net::UnixListener;

        // Remove a stale socket left by a previous run
        let _ = std::fs::remove_file(&self.path);

        let listener = UnixListener::bind(&self.path).context("Failed to bind Unix socket")?;

        info!("Listening on {}", self.path);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            info!("Client connected");
                            let (reader, writer) = stream.into_split();
                            self.spawn_client(reader, writer);
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.path);

        Ok(())
    }

    #[cfg(windows)]
    async fn listen(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let mut first = true;

        loop {
            let pipe = ServerOptions::new()
                .first_pipe_instance(first)
                .create(&self.path)
                .context("Failed to create named pipe")?;
            first = false;

            info!("Waiting for client connection...");

            tokio::select! {
                result = pipe.connect() => {
                    match result {
                        Ok(()) => {
                            info!("Client connected");
                            let (reader, writer) = tokio::io::split(pipe);
                            self.spawn_client(reader, writer);
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    fn spawn_client<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handler = self.handler.clone();
        let forwarder = self.forwarder.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(reader, writer, handler, forwarder).await {
                error!("Client handler error: {}", e);
            }
        });
    }
}

/// Serve one connection: answer requests in order and interleave pushed events
async fn handle_client<R, W>(
    reader: R,
    writer: W,
    handler: Arc<MessageHandler>,
    forwarder: Arc<EventForwarder>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let (event_tx, mut event_rx) = mpsc::channel::<IpcMessage>(EVENT_QUEUE);
    let forward_task = tokio::spawn(forwarder.subscribe().forward(event_tx));

    let event_writer = writer.clone();
    let write_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Err(e) = write_message(&event_writer, &event).await {
                warn!("Failed to push event: {}", e);
                break;
            }
        }
    });

    let result = serve_requests(&mut reader, &writer, &handler).await;

    forward_task.abort();
    write_task.abort();

    result
}

async fn serve_requests<R, W>(
    reader: &mut BufReader<R>,
    writer: &Arc<Mutex<W>>,
    handler: &MessageHandler,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                info!("Client disconnected");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!("Received message: {}", trimmed);

                let response = match serde_json::from_str::<IpcMessage>(trimmed) {
                    Ok(msg) => handler.handle_message(msg).await,
                    Err(e) => {
                        warn!("Failed to parse message: {}", e);
                        IpcMessage::response_err(
                            "unknown",
                            IpcError::new(
                                error_codes::PARSE_ERROR,
                                format!("Failed to parse message: {}", e),
                            ),
                        )
                    }
                };

                write_message(writer, &response).await?;
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }
    }

    Ok(())
}

/// One JSON document per line; the lock keeps responses and events from interleaving
async fn write_message<W>(writer: &Arc<Mutex<W>>, message: &IpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message)?;

    let mut w = writer.lock().await;
    w.write_all(json.as_bytes()).await?;
    w.write_all(b"\n").await?;
    w.flush().await?;

    debug!("Sent message: {}", json);
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::api::memory::MemoryBackend;
    use crate::config::BucketConfig;
    use crate::ipc::handler::AppState;
    use crate::models::{events, methods, MessageType};
    use crate::test_support::PASSWORD;
    use serde_json::json;
    use tokio::net::UnixStream;

    async fn start(path: &str) -> (Arc<MemoryBackend>, tokio::task::JoinHandle<Result<()>>) {
        let backend = Arc::new(MemoryBackend::marketplace());
        let state = AppState::with_backend(backend.clone(), None, None, BucketConfig::default());
        let forwarder = Arc::new(EventForwarder::new(
            state.session.clone(),
            state.verification.clone(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);
        let handler = Arc::new(MessageHandler::new(state, shutdown_tx.clone()));
        let server = IpcServer::new(path, handler, forwarder, shutdown_tx);

        let task = tokio::spawn(async move { server.run().await });

        // Wait for the socket to appear
        for _ in 0..100 {
            if std::path::Path::new(path).exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        (backend, task)
    }

    #[tokio::test]
    async fn serves_requests_events_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipc.sock");
        let path = path.to_str().unwrap();
        let (backend, task) = start(path).await;
        backend.add_user("ana@example.com", PASSWORD, "Ana");

        let mut stream = UnixStream::connect(path).await.unwrap();
        let (read_half, mut write_half) = stream.split();
        let mut lines = BufReader::new(read_half).lines();

        let mut line = b"{not json}\n".to_vec();
        write_half.write_all(&line).await.unwrap();
        let reply: IpcMessage =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply.error.unwrap().code, error_codes::PARSE_ERROR);

        let sign_in = IpcMessage::request(
            methods::AUTH_SIGN_IN,
            Some(json!({"email": "ana@example.com", "password": PASSWORD})),
        );
        line = serde_json::to_vec(&sign_in).unwrap();
        line.push(b'\n');
        write_half.write_all(&line).await.unwrap();

        // The response and the session event may arrive in either order
        let mut saw_response = false;
        let mut saw_event = false;
        while !(saw_response && saw_event) {
            let message: IpcMessage =
                serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            match message.message_type {
                MessageType::Response => {
                    assert_eq!(message.id, sign_in.id);
                    saw_response = true;
                }
                MessageType::Event => {
                    assert_eq!(message.method.as_deref(), Some(events::SESSION_CHANGED));
                    saw_event = true;
                }
                MessageType::Request => panic!("server sent a request"),
            }
        }

        line = serde_json::to_vec(&IpcMessage::request(methods::SHUTDOWN, None)).unwrap();
        line.push(b'\n');
        write_half.write_all(&line).await.unwrap();
        task.await.unwrap().unwrap();
        assert!(!std::path::Path::new(path).exists());
    }
}
