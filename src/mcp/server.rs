//! MCP server loop.
//!
//! This module implements the MCP server lifecycle:
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: Handling tool calls and resource reads
//! 3. **Shutdown**: Graceful connection termination
//!
//! # Scheduling
//!
//! One reader pulls messages off the input stream in arrival order and
//! admits each request against the session state at that moment. The
//! handshake runs on the reader itself, so a request pipelined right behind
//! `initialize` is admitted against its outcome. Every other admitted request
//! is handed to its own task, which writes its own reply through the shared
//! [`MessageWriter`]; replies may therefore leave in a different order than
//! their requests arrived. Rejections, notifications and framing errors are
//! handled inline by the reader.
//!
//! A shutdown signal or end of input stops the reader and moves the session
//! to `ShuttingDown`. Requests admitted before that still run, and get a
//! bounded amount of time to finish before they are aborted and the output is
//! closed.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncRead;
use tokio::task::{self, JoinError, JoinSet};

use crate::mcp::protocol::{
    ErrorCode, IncomingMessage, JsonRpcError, JsonRpcRequest, JsonRpcResponse, OutgoingMessage,
    RequestId,
};
use crate::mcp::router::{Admitted, Method, Router};
use crate::mcp::session::Session;
use crate::mcp::transport::{self, MessageReader, MessageWriter, DEFAULT_MAX_MESSAGE_BYTES};

/// Default time outstanding requests get to finish once shutdown begins.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for the server loop.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// How long to wait for outstanding requests during shutdown.
    pub shutdown_timeout: Duration,
    /// Messages larger than this are rejected with a parse error.
    pub max_message_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Bookkeeping for a dispatched request, keyed by its worker task.
#[derive(Debug)]
struct InFlightRequest {
    id: RequestId,
    method: String,
    started_at: Instant,
}

type Worker = io::Result<()>;

/// MCP server.
pub struct McpServer {
    router: Arc<Router>,
    options: ServerOptions,
}

impl McpServer {
    /// Creates a new MCP server around a populated router.
    #[must_use]
    pub fn new(router: Router, options: ServerOptions) -> Self {
        Self {
            router: Arc::new(router),
            options,
        }
    }

    /// Returns the session shared with request workers.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        self.router.session()
    }

    /// Runs the server over stdin/stdout until end of input or a shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run(&self) -> io::Result<()> {
        let (reader, writer) = transport::stdio();
        let reader = reader.with_max_message_bytes(self.options.max_message_bytes);
        self.serve(reader, writer, shutdown_signal()).await
    }

    /// Runs the server over an arbitrary stream pair.
    ///
    /// Returns once `shutdown` completes or the input reaches end of stream,
    /// after outstanding requests have drained or the shutdown timeout has
    /// elapsed.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails or a reply cannot be written.
    pub async fn serve<R, F>(
        &self,
        mut reader: MessageReader<R>,
        writer: MessageWriter,
        shutdown: F,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut workers: JoinSet<Worker> = JoinSet::new();
        let mut in_flight: HashMap<task::Id, InFlightRequest> = HashMap::new();

        tracing::info!("MCP server ready, waiting for messages on stdin");

        let outcome = loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break Ok(());
                }

                Some(joined) = workers.join_next_with_id(), if !workers.is_empty() => {
                    if let Err(e) = reap(joined, &mut in_flight, &writer).await {
                        break Err(e);
                    }
                }

                frame = reader.read_next() => match frame {
                    Ok(None) => {
                        tracing::info!("Input closed");
                        break Ok(());
                    }
                    Ok(Some(Ok(IncomingMessage::Request(req)))) => {
                        if let Err(e) = self.admit(req, &mut workers, &mut in_flight, &writer).await {
                            break Err(e);
                        }
                    }
                    Ok(Some(Ok(IncomingMessage::Notification(notif)))) => {
                        self.router.handle_notification(&notif);
                    }
                    Ok(Some(Err(error))) => {
                        tracing::debug!(code = error.error.code, message = %error.error.message, "Rejected message");
                        if let Err(e) = writer.send(&error).await {
                            break Err(e);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read from input");
                        break Err(e);
                    }
                },
            }
        };

        self.drain(&mut workers, &mut in_flight, &writer).await;

        if let Err(e) = writer.close().await {
            tracing::debug!(error = %e, "Failed to close output");
        }
        tracing::info!("MCP server stopped");

        outcome
    }

    /// Admits `req` and either answers it on the spot or hands it to a worker.
    ///
    /// # Errors
    ///
    /// Returns an error if a reply written by the reader cannot be sent.
    async fn admit(
        &self,
        req: JsonRpcRequest,
        workers: &mut JoinSet<Worker>,
        in_flight: &mut HashMap<task::Id, InFlightRequest>,
        writer: &MessageWriter,
    ) -> io::Result<()> {
        let JsonRpcRequest { id, method, params, .. } = req;
        match self.router.admit(&method, params) {
            Err(err) => {
                tracing::debug!(id = %id, method = %method, error = %err, "Request not admitted");
                writer.send(&JsonRpcError::new(Some(id), err.to_error_data())).await
            }
            Ok(admitted) if admitted.method() == Method::Initialize => {
                let reply = respond(&self.router, id, &method, admitted).await;
                writer.send(&reply).await
            }
            Ok(admitted) => {
                self.dispatch(id, method, admitted, workers, in_flight, writer);
                Ok(())
            }
        }
    }

    /// Spawns a worker that runs an admitted request and writes its reply.
    fn dispatch(
        &self,
        id: RequestId,
        method: String,
        admitted: Admitted,
        workers: &mut JoinSet<Worker>,
        in_flight: &mut HashMap<task::Id, InFlightRequest>,
        writer: &MessageWriter,
    ) {
        let record = InFlightRequest {
            id: id.clone(),
            method: method.clone(),
            started_at: Instant::now(),
        };
        tracing::debug!(id = %record.id, method = %record.method, "Dispatching request");

        let router = Arc::clone(&self.router);
        let writer = writer.clone();
        let handle = workers.spawn(async move {
            let reply = respond(&router, id, &method, admitted).await;
            writer.send(&reply).await
        });

        in_flight.insert(handle.id(), record);
    }

    /// Moves the session to `ShuttingDown` and waits for outstanding work.
    async fn drain(
        &self,
        workers: &mut JoinSet<Worker>,
        in_flight: &mut HashMap<task::Id, InFlightRequest>,
        writer: &MessageWriter,
    ) {
        let previous = self.router.session().begin_shutdown();
        tracing::info!(
            previous_state = ?previous,
            outstanding = workers.len(),
            "Shutting down"
        );

        let wait_all = async {
            while let Some(joined) = workers.join_next_with_id().await {
                if let Err(e) = reap(joined, in_flight, writer).await {
                    tracing::debug!(error = %e, "Reply lost during shutdown");
                }
            }
        };

        if tokio::time::timeout(self.options.shutdown_timeout, wait_all)
            .await
            .is_err()
        {
            tracing::warn!(
                abandoned = workers.len(),
                timeout_ms = self.options.shutdown_timeout.as_millis(),
                "Shutdown timeout elapsed, aborting outstanding requests"
            );
            workers.shutdown().await;
            for (_, req) in in_flight.drain() {
                tracing::debug!(id = %req.id, method = %req.method, "Request aborted");
            }
        }
    }
}

/// Runs an admitted request and builds its reply.
async fn respond(router: &Router, id: RequestId, method: &str, admitted: Admitted) -> OutgoingMessage {
    match router.handle_admitted(admitted).await {
        Ok(result) => JsonRpcResponse::success(id, result).into(),
        Err(err) => {
            if err.code() == ErrorCode::InternalError {
                tracing::error!(id = %id, method = %method, error = %err, "Request failed");
            } else {
                tracing::debug!(id = %id, method = %method, error = %err, "Request rejected");
            }
            JsonRpcError::new(Some(id), err.to_error_data()).into()
        }
    }
}

/// Records a finished worker. A panicked worker gets an internal error reply
/// on its behalf.
///
/// # Errors
///
/// Returns an error if the worker failed to write its reply, or if the
/// internal error reply for a panicked worker cannot be written.
async fn reap(
    joined: Result<(task::Id, Worker), JoinError>,
    in_flight: &mut HashMap<task::Id, InFlightRequest>,
    writer: &MessageWriter,
) -> io::Result<()> {
    match joined {
        Ok((task_id, written)) => {
            if let Some(req) = in_flight.remove(&task_id) {
                tracing::debug!(
                    id = %req.id,
                    method = %req.method,
                    elapsed_ms = elapsed_ms(req.started_at),
                    "Request completed"
                );
            }
            written
        }
        Err(join_error) => {
            let Some(req) = in_flight.remove(&join_error.id()) else {
                return Ok(());
            };
            if join_error.is_panic() {
                tracing::error!(
                    id = %req.id,
                    method = %req.method,
                    elapsed_ms = elapsed_ms(req.started_at),
                    "Request handler panicked"
                );
                writer.send(&JsonRpcError::internal_error(req.id)).await
            } else {
                tracing::debug!(id = %req.id, method = %req.method, "Request cancelled");
                Ok(())
            }
        }
    }
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Completes when the process receives SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Failed to install signal handlers");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

/// Completes when the process receives Ctrl+C.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}
