//! Model Context Protocol (MCP) server implementation.
//!
//! This module implements the protocol engine: newline-delimited JSON-RPC 2.0
//! over stdio, the `initialize` handshake, and registries of tools and
//! resources whose inputs are checked against declarative schemas before any
//! handler runs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌──────────────┐     │
//! │   │  Transport  │───▶│   Server    │───▶│    Router    │     │
//! │   │   (stdio)   │    │ (task pool) │    │  (session)   │     │
//! │   └─────────────┘    └─────────────┘    └──────────────┘     │
//! │          ▲                  │                 │    │         │
//! │          │                  │                 ▼    ▼         │
//! │          │                  │          ┌───────┐ ┌─────────┐ │
//! │          │                  │          │ Tools │ │Resources│ │
//! │          │                  │          └───────┘ └─────────┘ │
//! │          │                  ▼                 │    │         │
//! │   ┌──────────────────────────────────┐   ┌──────────────┐    │
//! │   │     Serialised reply writer      │   │    Schema    │    │
//! │   └──────────────────────────────────┘   └──────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2025-06-18 and also
//! accepts 2025-03-26 and 2024-11-05.

pub mod error;
pub mod protocol;
pub mod resources;
pub mod router;
pub mod schema;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

pub use error::{DispatchError, HandlerError, RegistryError};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use resources::{ResourceBody, ResourceDescriptor, ResourceParams, ResourceRegistry};
pub use router::Router;
pub use schema::{Schema, Violation};
pub use server::{McpServer, ServerOptions};
pub use session::Session;
pub use tools::{ToolCallResult, ToolDescriptor, ToolRegistry};
pub use transport::{MessageReader, MessageWriter};
