//! Session lifecycle and the `initialize` handshake.
//!
//! ```text
//! Uninitialized ──initialize──▶ Initializing ──valid version──▶ Ready
//!       ▲                            │                          │
//!       └──────unsupported version───┘                          │
//!                                              shutdown signal  ▼
//!                                                         ShuttingDown
//! ```
//!
//! The session is written in exactly two places: the handshake and the
//! shutdown transition. Everything else only reads it.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::error::DispatchError;
use crate::mcp::protocol::{SERVER_NAME, SUPPORTED_PROTOCOL_VERSIONS};

/// Session state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for initialize request.
    Uninitialized,
    /// Initialize received and being validated.
    Initializing,
    /// Ready for normal operation.
    Ready,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListCapabilities>,
    /// Resource-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceCapabilities>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ListCapabilities::default()),
            resources: Some(ResourceCapabilities::default()),
        }
    }
}

/// Capabilities of a static list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListCapabilities {
    /// Whether the list can change during the session.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

/// Resource-specific capabilities.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceCapabilities {
    /// Whether clients may subscribe to resource updates.
    #[serde(skip_serializing_if = "is_false")]
    pub subscribe: bool,
    /// Whether the resource list can change during the session.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool, so we must take &bool here
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Server information for initialisation response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// What the handshake agreed on.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    /// The protocol version both sides will speak.
    pub protocol_version: String,
    /// Who the client said it was.
    pub client_info: Option<ClientInfo>,
    /// The capabilities the client advertised.
    pub client_capabilities: Value,
}

/// The `initialize` result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated protocol version.
    pub protocol_version: String,
    /// What this server offers.
    pub capabilities: ServerCapabilities,
    /// Who this server is.
    pub server_info: ServerInfo,
    /// Usage hints for the client's model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    negotiated: Option<Negotiated>,
}

/// One per server process; shared by every request worker.
#[derive(Debug)]
pub struct Session {
    inner: RwLock<Inner>,
    server_info: ServerInfo,
    instructions: Option<String>,
}

impl Session {
    /// Creates an uninitialised session.
    #[must_use]
    pub const fn new(server_info: ServerInfo) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: SessionState::Uninitialized,
                negotiated: None,
            }),
            server_info,
            instructions: None,
        }
    }

    /// Sets the instructions returned by the handshake.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.read().state
    }

    /// Returns what the handshake agreed on, once it has completed.
    #[must_use]
    pub fn negotiated(&self) -> Option<Negotiated> {
        self.read().negotiated.clone()
    }

    /// Performs the handshake.
    ///
    /// A repeated `initialize` after a successful one returns the original
    /// negotiated result without re-validating.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::UnsupportedProtocolVersion`] if the requested
    ///   version is not supported; the session stays uninitialised
    /// - [`DispatchError::ShuttingDown`] once shutdown has begun
    pub fn initialize(&self, params: InitializeParams) -> Result<InitializeResult, DispatchError> {
        let mut inner = self.write();
        match inner.state {
            SessionState::ShuttingDown => return Err(DispatchError::ShuttingDown),
            SessionState::Ready => {
                if let Some(negotiated) = &inner.negotiated {
                    tracing::debug!("Repeated initialize, returning existing negotiation");
                    return Ok(self.result_for(negotiated));
                }
            }
            SessionState::Uninitialized | SessionState::Initializing => {}
        }

        inner.state = SessionState::Initializing;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&params.protocol_version.as_str()) {
            inner.state = SessionState::Uninitialized;
            tracing::warn!(
                requested = %params.protocol_version,
                "Client requested an unsupported protocol version"
            );
            return Err(DispatchError::UnsupportedProtocolVersion(params.protocol_version));
        }

        let negotiated = Negotiated {
            protocol_version: params.protocol_version,
            client_info: params.client_info,
            client_capabilities: params.capabilities,
        };
        let result = self.result_for(&negotiated);

        tracing::info!(
            protocol_version = %negotiated.protocol_version,
            client = negotiated.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            "Session initialised"
        );
        inner.negotiated = Some(negotiated);
        inner.state = SessionState::Ready;
        Ok(result)
    }

    fn result_for(&self, negotiated: &Negotiated) -> InitializeResult {
        InitializeResult {
            protocol_version: negotiated.protocol_version.clone(),
            capabilities: ServerCapabilities::default(),
            server_info: self.server_info.clone(),
            instructions: self.instructions.clone(),
        }
    }

    /// Ensures the session is ready for normal requests.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotInitialised`] before the handshake and
    /// [`DispatchError::ShuttingDown`] after shutdown has begun.
    pub fn require_ready(&self) -> Result<(), DispatchError> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::ShuttingDown => Err(DispatchError::ShuttingDown),
            SessionState::Uninitialized | SessionState::Initializing => {
                Err(DispatchError::NotInitialised)
            }
        }
    }

    /// Ensures the session has not begun shutting down.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ShuttingDown`] after shutdown has begun.
    pub fn require_open(&self) -> Result<(), DispatchError> {
        if self.state() == SessionState::ShuttingDown {
            return Err(DispatchError::ShuttingDown);
        }
        Ok(())
    }

    /// Moves to `ShuttingDown`. Returns the previous state.
    pub fn begin_shutdown(&self) -> SessionState {
        let mut inner = self.write();
        let previous = inner.state;
        inner.state = SessionState::ShuttingDown;
        previous
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(ServerInfo::default())
    }
}
