//! Method dispatch.
//!
//! The router maps a method name to the handshake, a registry listing, or a
//! registry call. Apart from the handshake gate it performs no validation of
//! its own: tool arguments and resource parameters are checked by the
//! registries against their declared schemas.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::mcp::error::{DispatchError, HandlerError};
use crate::mcp::protocol::JsonRpcNotification;
use crate::mcp::resources::ResourceRegistry;
use crate::mcp::session::{InitializeParams, Session};
use crate::mcp::tools::ToolRegistry;

/// The methods this server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `initialize`
    Initialize,
    /// `ping`
    Ping,
    /// `tools/list`
    ToolsList,
    /// `tools/call`
    ToolsCall,
    /// `resources/list`
    ResourcesList,
    /// `resources/templates/list`
    ResourceTemplatesList,
    /// `resources/read`
    ResourcesRead,
}

impl Method {
    /// Looks up a method by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "initialize" => Self::Initialize,
            "ping" => Self::Ping,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "resources/list" => Self::ResourcesList,
            "resources/templates/list" => Self::ResourceTemplatesList,
            "resources/read" => Self::ResourcesRead,
            _ => return None,
        })
    }
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// Parameters for resources/read request.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// A request that passed [`Router::admit`].
#[derive(Debug)]
pub struct Admitted {
    method: Method,
    params: Option<Value>,
}

impl Admitted {
    /// The method being called.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }
}

/// Routes requests to the session and the registries.
///
/// Cheap to share: everything inside is behind an `Arc`.
pub struct Router {
    session: Arc<Session>,
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
}

impl Router {
    /// Creates a router over populated registries.
    #[must_use]
    pub const fn new(
        session: Arc<Session>,
        tools: Arc<ToolRegistry>,
        resources: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            session,
            tools,
            resources,
        }
    }

    /// The session this router gates on.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Decides whether a request may run, given the session state now.
    ///
    /// The server calls this as each request is read, so the handshake gate
    /// reflects arrival order. A request admitted before shutdown begins runs
    /// to completion even if the session moves to `ShuttingDown` meanwhile.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::MethodNotFound`] for unknown methods and
    /// [`DispatchError::NotInitialised`] or [`DispatchError::ShuttingDown`]
    /// when the session does not accept the method.
    pub fn admit(&self, method: &str, params: Option<Value>) -> Result<Admitted, DispatchError> {
        let method =
            Method::from_name(method).ok_or_else(|| DispatchError::MethodNotFound(method.to_string()))?;
        match method {
            // The handshake checks the state itself.
            Method::Initialize => {}
            Method::Ping => self.session.require_open()?,
            Method::ToolsList
            | Method::ToolsCall
            | Method::ResourcesList
            | Method::ResourceTemplatesList
            | Method::ResourcesRead => self.session.require_ready()?,
        }
        Ok(Admitted { method, params })
    }

    /// Runs an admitted request and produces its result value.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] describing why the request failed.
    pub async fn handle_admitted(&self, admitted: Admitted) -> Result<Value, DispatchError> {
        let Admitted { method, params } = admitted;
        match method {
            Method::Initialize => {
                let params: InitializeParams = decode_params(params, "initialize")?;
                let result = self.session.initialize(params)?;
                to_value(&result)
            }
            Method::Ping => Ok(json!({})),
            Method::ToolsList => Ok(json!({ "tools": self.tools.list() })),
            Method::ToolsCall => {
                let params: ToolCallParams = decode_params(params, "tools/call")?;
                let result = self.tools.invoke(&params.name, params.arguments).await?;
                to_value(&result)
            }
            Method::ResourcesList => Ok(json!({ "resources": self.resources.list() })),
            Method::ResourceTemplatesList => {
                Ok(json!({ "resourceTemplates": self.resources.templates() }))
            }
            Method::ResourcesRead => {
                let params: ReadResourceParams = decode_params(params, "resources/read")?;
                let result = self.resources.read(&params.uri).await?;
                to_value(&result)
            }
        }
    }

    /// Handles a notification. Notifications never produce a reply.
    pub fn handle_notification(&self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                tracing::debug!(state = ?self.session.state(), "Client reported initialised");
            }
            "notifications/cancelled" => {
                // Requests always run to completion; there is nothing to cancel.
                tracing::debug!(params = ?notif.params, "Ignoring cancellation notification");
            }
            other => tracing::debug!(method = other, "Ignoring unknown notification"),
        }
    }
}

fn decode_params<T: DeserializeOwned>(params: Option<Value>, method: &str) -> Result<T, DispatchError> {
    let params =
        params.ok_or_else(|| DispatchError::MalformedParams(format!("missing {method} params")))?;
    serde_json::from_value(params)
        .map_err(|e| DispatchError::MalformedParams(format!("invalid {method} params: {e}")))
}

fn to_value<T: serde::Serialize>(result: &T) -> Result<Value, DispatchError> {
    serde_json::to_value(result).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialise result");
        DispatchError::Handler(HandlerError::Internal(e.to_string()))
    })
}
