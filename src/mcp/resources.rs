//! Resource registry: URI-addressed, schema-described readable artefacts.
//!
//! Resources are registered either under an exact URI
//! (`movies://database/stats`) or under a URI template whose `{name}`
//! placeholders each bind one path segment (`movies://posters/{id}`).
//! Lookup tries exact URIs first, then templates in registration order.
//! Templates that could both match some URI are rejected at registration,
//! so at most one template can structurally match a URI.

use std::future::Future;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::mcp::error::{DispatchError, HandlerError, RegistryError};
use crate::mcp::schema::{Schema, SchemaType};
use crate::mcp::tools::HandlerFuture;

/// Parameters bound from a URI template, after coercion.
pub type ResourceParams = Map<String, Value>;

/// What a producer returns before it is wrapped for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceBody {
    /// Structured data, checked against the response schema and sent as JSON text.
    Json(Value),
    /// Plain text.
    Text {
        /// The text.
        text: String,
        /// Its MIME type.
        mime_type: String,
    },
    /// Binary data, sent base64-encoded.
    Blob {
        /// The raw bytes.
        bytes: Vec<u8>,
        /// Their MIME type.
        mime_type: String,
    },
}

/// Something that can produce the body of a resource.
pub trait ResourceProducer: Send + Sync {
    /// Produces the resource for the given bound parameters.
    fn produce(&self, params: ResourceParams) -> HandlerFuture<ResourceBody>;
}

impl<F, Fut> ResourceProducer for F
where
    F: Fn(ResourceParams) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResourceBody, HandlerError>> + Send + 'static,
{
    fn produce(&self, params: ResourceParams) -> HandlerFuture<ResourceBody> {
        Box::pin(self(params))
    }
}

/// A resource as advertised by `resources/list` or `resources/templates/list`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Exact URI, for fixed resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// URI template, for parameterised resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri_template: Option<String>,
    /// Short name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// MIME type of the contents.
    pub mime_type: String,
    /// Shape of JSON responses.
    #[serde(skip)]
    pub response_schema: Option<Schema>,
    /// Shape of the bound template parameters.
    #[serde(skip)]
    pub param_schema: Option<Schema>,
}

impl ResourceDescriptor {
    /// Describes a resource at a fixed URI.
    #[must_use]
    pub fn exact(uri: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            uri_template: None,
            name: name.into(),
            description: description.into(),
            mime_type: "application/json".to_string(),
            response_schema: None,
            param_schema: None,
        }
    }

    /// Describes a family of resources addressed by a URI template.
    #[must_use]
    pub fn template(
        uri_template: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            uri: None,
            uri_template: Some(uri_template.into()),
            ..Self::exact(String::new(), name, description)
        }
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Sets the schema JSON responses must satisfy.
    #[must_use]
    pub fn with_response_schema(mut self, schema: Schema) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Sets the schema bound parameters must satisfy.
    #[must_use]
    pub fn with_param_schema(mut self, schema: Schema) -> Self {
        self.param_schema = Some(schema);
        self
    }

    /// The registration key: the URI or the template.
    #[must_use]
    pub fn key(&self) -> &str {
        self.uri
            .as_deref()
            .or(self.uri_template.as_deref())
            .unwrap_or_default()
    }
}

/// One item of a `resources/read` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// The URI that was read.
    pub uri: String,
    /// MIME type of the content.
    pub mime_type: String,
    /// Text content (for text-based resources).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64-encoded binary content (for binary resources).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadResourceResult {
    /// The contents; always exactly one item.
    pub contents: Vec<ResourceContents>,
}

/// One `/`-separated piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// Contains at least one placeholder; `prefix` and `suffix` are the
    /// literal text around them.
    Pattern { prefix: String, suffix: String },
}

impl Segment {
    fn parse(segment: &str) -> Self {
        match (segment.find('{'), segment.rfind('}')) {
            (Some(open), Some(close)) => Self::Pattern {
                prefix: segment[..open].to_string(),
                suffix: segment[close + 1..].to_string(),
            },
            _ => Self::Literal(segment.to_string()),
        }
    }

    /// Whether some single path segment could match both.
    fn compatible(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Literal(text), Self::Pattern { prefix, suffix })
            | (Self::Pattern { prefix, suffix }, Self::Literal(text)) => {
                text.len() > prefix.len() + suffix.len()
                    && text.starts_with(prefix.as_str())
                    && text.ends_with(suffix.as_str())
            }
            (
                Self::Pattern { prefix: p1, suffix: s1 },
                Self::Pattern { prefix: p2, suffix: s2 },
            ) => {
                (p1.starts_with(p2.as_str()) || p2.starts_with(p1.as_str()))
                    && (s1.ends_with(s2.as_str()) || s2.ends_with(s1.as_str()))
            }
        }
    }
}

/// A parsed URI template such as `movies://posters/{id}`.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    source: String,
    regex: Regex,
    params: Vec<String>,
    segments: Vec<Segment>,
}

impl UriTemplate {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns an error for unbalanced braces, parameter names that are not
    /// identifiers or are repeated, and templates with no parameters.
    pub fn parse(template: &str) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut pattern = String::from("^");
        let mut params: Vec<String> = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find(['{', '}']) {
            if rest[open..].starts_with('}') {
                return Err(invalid("unexpected '}'"));
            }
            let literal = &rest[..open];
            pattern.push_str(&regex::escape(literal));

            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
            let name = &after[..close];
            let starts_well = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_');
            if !starts_well || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid("parameter names must be identifiers"));
            }
            if params.iter().any(|p| p == name) {
                return Err(invalid("parameter names must be unique"));
            }
            pattern.push_str(&format!("(?P<{name}>[^/]+)"));
            params.push(name.to_string());
            rest = &after[close + 1..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        if params.is_empty() {
            return Err(invalid("templates need at least one parameter"));
        }

        let regex = Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self {
            source: template.to_string(),
            regex,
            params,
            segments: template.split('/').map(Segment::parse).collect(),
        })
    }

    /// The template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Binds the placeholders if `uri` matches, as string values.
    #[must_use]
    pub fn bind(&self, uri: &str) -> Option<ResourceParams> {
        let captures = self.regex.captures(uri)?;
        let mut bound = Map::new();
        for name in &self.params {
            let value = captures.name(name)?.as_str();
            bound.insert(name.clone(), Value::String(value.to_string()));
        }
        Some(bound)
    }

    /// Two templates overlap when some URI matches both. Placeholders never
    /// span a `/`, so that needs equal segment counts and every pair of
    /// segments compatible.
    fn overlaps(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| a.compatible(b))
    }
}

struct RegisteredResource {
    descriptor: ResourceDescriptor,
    producer: Arc<dyn ResourceProducer>,
}

/// Registry of resources, keyed by URI or URI template.
#[derive(Default)]
pub struct ResourceRegistry {
    exact: IndexMap<String, RegisteredResource>,
    templates: Vec<(UriTemplate, RegisteredResource)>,
}

impl ResourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI or template is already registered, if a
    /// template overlaps an existing one, or if a template is malformed.
    pub fn register<P>(&mut self, descriptor: ResourceDescriptor, producer: P) -> Result<(), RegistryError>
    where
        P: ResourceProducer + 'static,
    {
        let entry = RegisteredResource {
            producer: Arc::new(producer),
            descriptor,
        };

        if let Some(uri) = entry.descriptor.uri.clone() {
            if self.exact.contains_key(&uri) {
                return Err(RegistryError::DuplicateResource(uri));
            }
            tracing::debug!(uri = %uri, "Registering resource");
            self.exact.insert(uri, entry);
            return Ok(());
        }

        let source = entry.descriptor.uri_template.clone().unwrap_or_default();
        let template = UriTemplate::parse(&source)?;
        for (existing, _) in &self.templates {
            if existing.as_str() == template.as_str() {
                return Err(RegistryError::DuplicateResource(source));
            }
            if existing.overlaps(&template) {
                return Err(RegistryError::OverlappingTemplate {
                    new: source,
                    existing: existing.as_str().to_string(),
                });
            }
        }
        tracing::debug!(template = %source, "Registering resource template");
        self.templates.push((template, entry));
        Ok(())
    }

    /// Fixed-URI resources, in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<&ResourceDescriptor> {
        self.exact.values().map(|r| &r.descriptor).collect()
    }

    /// Templated resources, in registration order.
    #[must_use]
    pub fn templates(&self) -> Vec<&ResourceDescriptor> {
        self.templates.iter().map(|(_, r)| &r.descriptor).collect()
    }

    /// Number of registered resources and templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len() + self.templates.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve(&self, uri: &str) -> Option<(&RegisteredResource, ResourceParams)> {
        if let Some(entry) = self.exact.get(uri) {
            return Some((entry, Map::new()));
        }
        self.templates
            .iter()
            .find_map(|(template, entry)| template.bind(uri).map(|params| (entry, params)))
    }

    /// Resolves `uri`, validates its parameters, runs the producer and wraps
    /// the output.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::ResourceNotFound`] if nothing matches `uri`
    /// - [`DispatchError::Validation`] if bound parameters fail the param schema
    /// - [`DispatchError::Handler`] if the producer fails, or returns JSON that
    ///   does not satisfy the response schema (reported as an internal error)
    pub async fn read(&self, uri: &str) -> Result<ReadResourceResult, DispatchError> {
        let (entry, params) = self
            .resolve(uri)
            .ok_or_else(|| DispatchError::ResourceNotFound(uri.to_string()))?;

        let params = match &entry.descriptor.param_schema {
            Some(schema) => {
                let params = coerce_params(schema, params);
                let violations = schema.validate(&Value::Object(params.clone()));
                if !violations.is_empty() {
                    return Err(DispatchError::Validation {
                        context: format!("Parameters for resource '{uri}'"),
                        violations,
                    });
                }
                params
            }
            None => params,
        };

        let producer = Arc::clone(&entry.producer);
        let body = producer.produce(params).await?;
        let contents = wrap_body(uri, &entry.descriptor, body)?;
        Ok(ReadResourceResult {
            contents: vec![contents],
        })
    }
}

fn wrap_body(
    uri: &str,
    descriptor: &ResourceDescriptor,
    body: ResourceBody,
) -> Result<ResourceContents, HandlerError> {
    let contents = match body {
        ResourceBody::Json(value) => {
            if let Some(schema) = &descriptor.response_schema {
                let violations = schema.validate(&value);
                if !violations.is_empty() {
                    tracing::error!(
                        uri,
                        violations = ?violations,
                        "Resource producer returned a response outside its schema"
                    );
                    return Err(HandlerError::Internal(format!(
                        "response for '{uri}' violates its schema"
                    )));
                }
            }
            let text = serde_json::to_string_pretty(&value)
                .map_err(|e| HandlerError::Internal(e.to_string()))?;
            ResourceContents {
                uri: uri.to_string(),
                mime_type: descriptor.mime_type.clone(),
                text: Some(text),
                blob: None,
            }
        }
        ResourceBody::Text { text, mime_type } => ResourceContents {
            uri: uri.to_string(),
            mime_type,
            text: Some(text),
            blob: None,
        },
        ResourceBody::Blob { bytes, mime_type } => ResourceContents {
            uri: uri.to_string(),
            mime_type,
            text: None,
            blob: Some(BASE64_STANDARD.encode(bytes)),
        },
    };
    Ok(contents)
}

/// Converts bound string parameters to the scalar types the schema declares.
///
/// Values that do not parse are left as strings so validation reports them.
fn coerce_params(schema: &Schema, params: ResourceParams) -> ResourceParams {
    params
        .into_iter()
        .map(|(name, value)| {
            let coerced = match (schema.properties().get(&name).map(Schema::kind), &value) {
                (Some(SchemaType::Integer), Value::String(s)) => {
                    s.parse::<i64>().ok().map(Value::from)
                }
                (Some(SchemaType::Number), Value::String(s)) => s
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number),
                (Some(SchemaType::Boolean), Value::String(s)) => s.parse::<bool>().ok().map(Value::Bool),
                _ => None,
            };
            (name, coerced.unwrap_or(value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stats_schema() -> Schema {
        Schema::object()
            .property("movies", Schema::integer().minimum(0.0))
            .require(["movies"])
    }

    fn id_schema() -> Schema {
        Schema::object()
            .property("id", Schema::integer().minimum(1.0))
            .require(["id"])
    }

    fn registry() -> ResourceRegistry {
        let mut registry = ResourceRegistry::new();
        registry
            .register(
                ResourceDescriptor::exact("movies://database/stats", "stats", "Counts")
                    .with_response_schema(stats_schema()),
                |_params: ResourceParams| async { Ok::<_, HandlerError>(ResourceBody::Json(json!({"movies": 3}))) },
            )
            .unwrap();
        registry
            .register(
                ResourceDescriptor::template("movies://posters/{id}", "poster", "Poster image")
                    .with_mime_type("image/png")
                    .with_param_schema(id_schema()),
                |params: ResourceParams| async move {
                    let id = params["id"].as_i64().unwrap_or_default();
                    Ok::<_, HandlerError>(ResourceBody::Blob {
                        bytes: vec![u8::try_from(id).unwrap_or(0), 1, 2],
                        mime_type: "image/png".to_string(),
                    })
                },
            )
            .unwrap();
        registry
    }

    #[test]
    fn template_binds_single_segments() {
        let template = UriTemplate::parse("movies://movies/{id}/cast/{actor}").unwrap();
        let bound = template.bind("movies://movies/7/cast/12").unwrap();
        assert_eq!(bound["id"], "7");
        assert_eq!(bound["actor"], "12");
        assert!(template.bind("movies://movies/7/cast").is_none());
        assert!(template.bind("movies://movies/7/8/cast/12").is_none());
    }

    #[test]
    fn template_literals_are_escaped() {
        let template = UriTemplate::parse("movies://x.y/{id}").unwrap();
        assert!(template.bind("movies://xzy/1").is_none());
        assert!(template.bind("movies://x.y/1").is_some());
    }

    #[test]
    fn malformed_templates_are_rejected() {
        let bad_templates = [
            "movies://{",
            "movies://}",
            "movies://{}",
            "movies://{a}/{a}",
            "movies://plain",
            "m://{a-b}",
        ];
        for bad in bad_templates {
            assert!(UriTemplate::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn overlapping_templates_are_rejected() {
        let mut registry = registry();
        let err = registry
            .register(
                ResourceDescriptor::template("movies://posters/{poster}", "dup", "Overlap"),
                |_p: ResourceParams| async { Ok::<_, HandlerError>(ResourceBody::Json(json!({}))) },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::OverlappingTemplate { .. }));
    }

    #[test]
    fn templates_overlapping_in_different_segments_are_rejected() {
        let mut registry = ResourceRegistry::new();
        let body = |_p: ResourceParams| async { Ok::<_, HandlerError>(ResourceBody::Json(json!({}))) };
        registry
            .register(ResourceDescriptor::template("movies://{kind}/x", "kind", "By kind"), body)
            .unwrap();
        let err = registry
            .register(ResourceDescriptor::template("movies://y/{id}", "id", "By id"), body)
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::OverlappingTemplate { ref new, ref existing }
                if new == "movies://y/{id}" && existing == "movies://{kind}/x"
        ));
    }

    #[test]
    fn disjoint_templates_coexist() {
        let mut registry = ResourceRegistry::new();
        let body = |_p: ResourceParams| async { Ok::<_, HandlerError>(ResourceBody::Json(json!({}))) };
        let templates = [
            "movies://movies/{id}",
            "movies://actors/{id}",
            "movies://movies/{id}/cast",
            "movies://posters/p-{id}.png",
            "movies://posters/q-{id}.png",
            "movies://posters/{id}.jpg",
        ];
        for template in templates {
            registry
                .register(ResourceDescriptor::template(template, template, "Disjoint"), body)
                .unwrap();
        }
        assert_eq!(registry.templates().len(), templates.len());

        let err = registry
            .register(ResourceDescriptor::template("movies://posters/p-{n}", "p", "Prefix"), body)
            .unwrap_err();
        assert!(matches!(err, RegistryError::OverlappingTemplate { .. }));
    }

    #[test]
    fn duplicate_exact_uri_is_rejected() {
        let mut registry = registry();
        let err = registry
            .register(
                ResourceDescriptor::exact("movies://database/stats", "again", "Again"),
                |_p: ResourceParams| async { Ok::<_, HandlerError>(ResourceBody::Json(json!({}))) },
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateResource(_)));
    }

    #[test]
    fn listing_splits_exact_and_templates() {
        let registry = registry();
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.templates().len(), 1);
        let json = serde_json::to_value(registry.templates()[0]).unwrap();
        assert_eq!(json["uriTemplate"], "movies://posters/{id}");
        assert!(json.get("uri").is_none());
    }

    #[tokio::test]
    async fn read_exact_resource() {
        let result = registry().read("movies://database/stats").await.unwrap();
        let contents = &result.contents[0];
        assert_eq!(contents.uri, "movies://database/stats");
        assert_eq!(contents.mime_type, "application/json");
        let body: Value = serde_json::from_str(contents.text.as_ref().unwrap()).unwrap();
        assert_eq!(body["movies"], 3);
    }

    #[tokio::test]
    async fn read_template_resource_coerces_and_encodes() {
        let result = registry().read("movies://posters/5").await.unwrap();
        let contents = &result.contents[0];
        assert_eq!(contents.blob.as_deref(), Some(BASE64_STANDARD.encode([5u8, 1, 2]).as_str()));
        assert!(contents.text.is_none());
    }

    #[tokio::test]
    async fn read_rejects_bad_params() {
        let err = registry().read("movies://posters/abc").await.unwrap_err();
        let DispatchError::Validation { violations, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(violations[0].path, "$.id");
    }

    #[tokio::test]
    async fn unknown_uri_echoes_it() {
        let err = registry().read("movies://nowhere").await.unwrap_err();
        assert!(matches!(err, DispatchError::ResourceNotFound(uri) if uri == "movies://nowhere"));
    }

    #[tokio::test]
    async fn response_outside_schema_is_internal() {
        let mut registry = ResourceRegistry::new();
        registry
            .register(
                ResourceDescriptor::exact("movies://broken", "broken", "Broken")
                    .with_response_schema(stats_schema()),
                |_p: ResourceParams| async { Ok::<_, HandlerError>(ResourceBody::Json(json!({"movies": "many"}))) },
            )
            .unwrap();
        let err = registry.read("movies://broken").await.unwrap_err();
        assert!(matches!(err, DispatchError::Handler(HandlerError::Internal(_))));
    }
}
