//! Error types for the protocol engine.
//!
//! [`DispatchError`] is everything a request can fail with once it has been
//! parsed; it knows which JSON-RPC code it maps to. Handlers raise
//! [`HandlerError`], and startup registration raises [`RegistryError`].

use serde_json::{json, Value};
use thiserror::Error;

use crate::mcp::protocol::{ErrorCode, JsonRpcErrorData, SUPPORTED_PROTOCOL_VERSIONS};
use crate::mcp::schema::Violation;

/// Errors raised by tool handlers and resource producers.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The referenced entity does not exist.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of entity, e.g. "movie".
        entity: &'static str,
        /// The identifier that was looked up.
        key: String,
    },

    /// The operation conflicts with existing data.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Arguments passed validation but are still unusable.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Unexpected collaborator failure. Never shown to clients.
    #[error("internal failure: {0}")]
    Internal(String),
}

/// Errors raised while populating the registries at startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two tools share a name.
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    /// A tool's input schema is not an object schema.
    #[error("tool '{0}' must take an object input schema")]
    InputSchemaNotObject(String),

    /// Two resources share a URI or URI template.
    #[error("resource '{0}' is already registered")]
    DuplicateResource(String),

    /// A URI template would match the same URIs as an existing one.
    #[error("resource template '{new}' overlaps with '{existing}'")]
    OverlappingTemplate {
        /// The template being registered.
        new: String,
        /// The template already registered.
        existing: String,
    },

    /// A URI template is malformed.
    #[error("invalid resource template '{template}': {reason}")]
    InvalidTemplate {
        /// The template text.
        template: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Everything a parsed request can fail with.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A method other than `initialize` arrived before the handshake.
    #[error("Server not initialised")]
    NotInitialised,

    /// The server has begun shutting down.
    #[error("Server is shutting down")]
    ShuttingDown,

    /// Unknown top-level method.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Unknown tool name in `tools/call`.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Unknown URI in `resources/read`.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The client asked for a protocol version outside the supported set.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    /// Request parameters could not be decoded.
    #[error("Invalid params: {0}")]
    MalformedParams(String),

    /// Schema validation failed; carries every violation.
    #[error("{context} failed validation with {} violation(s)", violations.len())]
    Validation {
        /// What was being validated, e.g. "arguments for tool 'add_movie'".
        context: String,
        /// All violations, in stable order.
        violations: Vec<Violation>,
    },

    /// A handler rejected the call.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl DispatchError {
    /// Returns the JSON-RPC error code this error maps to.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialised | Self::ShuttingDown => ErrorCode::InvalidRequest,
            Self::MethodNotFound(_) | Self::UnknownTool(_) | Self::ResourceNotFound(_) => {
                ErrorCode::MethodNotFound
            }
            Self::UnsupportedProtocolVersion(_)
            | Self::MalformedParams(_)
            | Self::Validation { .. }
            | Self::Handler(
                HandlerError::NotFound { .. }
                | HandlerError::Conflict(_)
                | HandlerError::InvalidArguments(_),
            ) => ErrorCode::InvalidParams,
            Self::Handler(HandlerError::Internal(_)) => ErrorCode::InternalError,
        }
    }

    /// Converts this error into the wire error object.
    ///
    /// Internal failures are reported with a generic message; callers are
    /// expected to have logged the detail already.
    #[must_use]
    pub fn to_error_data(&self) -> JsonRpcErrorData {
        let code = self.code();
        if code == ErrorCode::InternalError {
            return JsonRpcErrorData::from_code(code);
        }

        let data: Option<Value> = match self {
            Self::UnknownTool(name) => Some(json!({ "tool": name })),
            Self::ResourceNotFound(uri) => Some(json!({ "uri": uri })),
            Self::UnsupportedProtocolVersion(requested) => Some(json!({
                "requested": requested,
                "supported": SUPPORTED_PROTOCOL_VERSIONS,
            })),
            Self::Validation { violations, .. } => Some(json!({ "violations": violations })),
            _ => None,
        };

        let error = JsonRpcErrorData::with_message(code, self.to_string());
        match data {
            Some(data) => error.with_data(data),
            None => error,
        }
    }
}
