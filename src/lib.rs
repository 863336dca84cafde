//! movie-catalog-mcp: MCP server exposing a movie and actor catalog
//!
//! This library provides the protocol engine and the catalog tools and
//! resources that let AI assistants query and extend a movie database over
//! the Model Context Protocol.
//!
//! # Architecture
//!
//! The protocol engine knows nothing about movies:
//!
//! - **Transport**: newline-delimited JSON-RPC 2.0 over stdin/stdout
//! - **Session**: the `initialize` handshake and version negotiation
//! - **Registries**: tools and resources with declarative input schemas
//! - **Server loop**: concurrent request handling and graceful shutdown
//!
//! The catalog plugs into it:
//! - Tools such as `add_movie` and `search_movies`
//! - Resources such as `movies://database/stats` and `movies://posters/{id}`
//! - A [`catalog::Store`] and a [`catalog::ImageFetcher`] behind them
//!
//! # Modules
//!
//! - [`config`] — Configuration loading and validation
//! - [`error`] — Startup error types
//! - [`mcp`] — MCP protocol implementation
//! - [`catalog`] — Movie catalog tools, resources and storage

pub mod catalog;
pub mod config;
pub mod error;
pub mod mcp;

use std::sync::Arc;

use crate::catalog::{Catalog, FsImageFetcher, ImageFetcher, MemoryStore, Store};
use crate::config::Config;
use crate::error::StartupError;
use crate::mcp::router::Router;
use crate::mcp::server::{McpServer, ServerOptions};
use crate::mcp::session::{ServerInfo, Session};

/// Opens the catalog described by `config` and wires it into a server.
///
/// # Errors
///
/// Returns an error if the data file cannot be loaded or the catalog cannot
/// be registered.
pub async fn build_server(config: &Config) -> Result<McpServer, StartupError> {
    let store: Arc<dyn Store> = match &config.store.data_file {
        Some(path) => Arc::new(MemoryStore::open(path).await?),
        None => {
            tracing::info!("No data file configured, catalog is in-memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let images = config.posters.directory.as_ref().map(|dir| {
        tracing::info!(directory = %dir.display(), "Serving posters");
        Arc::new(FsImageFetcher::new(dir)) as Arc<dyn ImageFetcher>
    });

    let (tools, resources) = catalog::registries(&Catalog { store, images })?;
    let session = Session::new(ServerInfo::default()).with_instructions(catalog::INSTRUCTIONS);
    let router = Router::new(Arc::new(session), Arc::new(tools), Arc::new(resources));

    Ok(McpServer::new(
        router,
        ServerOptions {
            shutdown_timeout: config.server.shutdown_timeout(),
            max_message_bytes: config.server.max_message_bytes,
        },
    ))
}
