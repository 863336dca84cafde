//! Tool registry: named, schema-described operations clients can call.
//!
//! Tools are registered once at startup and the registry is read-only
//! afterwards, so it can be shared between request workers without locking.
//! Every call is validated against the tool's input schema before its
//! handler runs; a handler never sees arguments that failed validation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::mcp::error::{DispatchError, HandlerError, RegistryError};
use crate::mcp::schema::{Schema, SchemaType};

/// Boxed future returned by tool handlers and resource producers.
pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = Result<T, HandlerError>> + Send>>;

/// Something that can execute a tool call with validated arguments.
///
/// Implemented for every `Fn(Value) -> impl Future<Output = Result<ToolCallResult, HandlerError>>`,
/// so most tools are registered as closures.
pub trait ToolHandler: Send + Sync {
    /// Runs the tool.
    fn call(&self, arguments: Value) -> HandlerFuture<ToolCallResult>;
}

impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolCallResult, HandlerError>> + Send + 'static,
{
    fn call(&self, arguments: Value) -> HandlerFuture<ToolCallResult> {
        Box::pin(self(arguments))
    }
}

/// A tool as advertised by `tools/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Schema for the tool's arguments.
    pub input_schema: Schema,
}

impl ToolDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Schema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Content item in a tool call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Base64-encoded image content.
    Image {
        /// The encoded image bytes.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires fn(&T) -> bool
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates a successful result holding pretty-printed JSON.
    #[must_use]
    pub fn json<T: Serialize>(value: &T) -> Self {
        let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
        Self::text(text)
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Registry of tools, keyed by name, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already taken or the input schema is
    /// not an object schema. Both are startup bugs.
    pub fn register<H>(&mut self, descriptor: ToolDescriptor, handler: H) -> Result<(), RegistryError>
    where
        H: ToolHandler + 'static,
    {
        if self.tools.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }
        if descriptor.input_schema.kind() != SchemaType::Object {
            return Err(RegistryError::InputSchemaNotObject(descriptor.name));
        }

        tracing::debug!(tool = %descriptor.name, "Registering tool");
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Returns every descriptor, in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<&ToolDescriptor> {
        self.tools.values().map(|t| &t.descriptor).collect()
    }

    /// Looks up a descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validates `arguments` and runs the named tool.
    ///
    /// Missing or `null` arguments are treated as an empty object.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::UnknownTool`] if no tool has that name
    /// - [`DispatchError::Validation`] with every violation if the arguments
    ///   do not match the input schema; the handler is not called
    /// - [`DispatchError::Handler`] if the handler fails
    pub async fn invoke(&self, name: &str, arguments: Value) -> Result<ToolCallResult, DispatchError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| DispatchError::UnknownTool(name.to_string()))?;

        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let violations = tool.descriptor.input_schema.validate(&arguments);
        if !violations.is_empty() {
            tracing::debug!(tool = name, violations = violations.len(), "Rejected tool arguments");
            return Err(DispatchError::Validation {
                context: format!("Arguments for tool '{name}'"),
                violations,
            });
        }

        let handler = Arc::clone(&tool.handler);
        handler.call(arguments).await.map_err(DispatchError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    fn echo_schema() -> Schema {
        Schema::object()
            .property("message", Schema::string().min_length(1))
            .require(["message"])
    }

    async fn echo(arguments: Value) -> Result<ToolCallResult, HandlerError> {
        let message = arguments["message"].as_str().unwrap_or_default().to_string();
        Ok(ToolCallResult::text(message))
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor::new("echo", "Echo a message", echo_schema()), echo)
            .unwrap();
        registry
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = registry();
        let err = registry
            .register(ToolDescriptor::new("echo", "Again", echo_schema()), echo)
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn non_object_schema_is_rejected() {
        let mut registry = ToolRegistry::new();
        let err = registry
            .register(ToolDescriptor::new("bad", "Bad", Schema::string()), echo)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InputSchemaNotObject(_)));
    }

    #[test]
    fn list_preserves_registration_order() {
        let mut registry = ToolRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry
                .register(ToolDescriptor::new(name, name, echo_schema()), echo)
                .unwrap();
        }
        let names: Vec<&str> = registry.list().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn invoke_runs_handler() {
        let result = registry().invoke("echo", json!({"message": "hi"})).await.unwrap();
        assert_eq!(result, ToolCallResult::text("hi"));
    }

    #[tokio::test]
    async fn unknown_tool() {
        let err = registry().invoke("delete_universe", json!({})).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownTool(name) if name == "delete_universe"));
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor::new("count", "Count calls", echo_schema()),
                move |_args: Value| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, HandlerError>(ToolCallResult::text("ok")) }
                },
            )
            .unwrap();

        let err = registry.invoke("count", Value::Null).await.unwrap_err();
        let DispatchError::Validation { violations, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "$.message");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_errors_propagate() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor::new("missing", "Always missing", Schema::object()),
                |_args: Value| async {
                    Err::<ToolCallResult, _>(HandlerError::NotFound {
                        entity: "movie",
                        key: "7".to_string(),
                    })
                },
            )
            .unwrap();
        let err = registry.invoke("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler(HandlerError::NotFound { .. })));
    }

    #[test]
    fn tool_call_result_serialisation() {
        let json = serde_json::to_value(ToolCallResult::error("boom")).unwrap();
        assert_eq!(json, json!({"content": [{"type": "text", "text": "boom"}], "isError": true}));
        let json = serde_json::to_value(ToolCallResult::text("ok")).unwrap();
        assert!(json.get("isError").is_none());
    }

    #[test]
    fn descriptor_serialises_input_schema() {
        let registry = registry();
        let json = serde_json::to_value(registry.get("echo").unwrap()).unwrap();
        assert_eq!(json["name"], "echo");
        assert_eq!(json["inputSchema"]["type"], "object");
        assert_eq!(json["inputSchema"]["required"], json!(["message"]));
    }
}
