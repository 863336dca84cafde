//! Declarative schemas and the validator that checks values against them.
//!
//! A [`Schema`] describes the expected shape of a JSON value: its type,
//! required members, numeric bounds, string length and pattern, allowed
//! values, array items and nested object properties. The same schema is
//! advertised to clients (as JSON Schema) and used to validate tool
//! arguments, resource parameters and resource responses.
//!
//! Validation is a pure function. It never mutates its input and always
//! returns violations in a stable order: declared property order for
//! objects, index order for arrays.

use std::fmt;

use indexmap::IndexMap;
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// The runtime kind a schema expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// JSON object.
    Object,
    /// JSON array.
    Array,
    /// JSON string.
    String,
    /// Whole number (`3` or `3.0`).
    Integer,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Boolean,
}

impl SchemaType {
    /// Returns the keyword used for this type in JSON Schema.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }

    fn parse(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "object" => Self::Object,
            "array" => Self::Array,
            "string" => Self::String,
            "integer" => Self::Integer,
            "number" => Self::Number,
            "boolean" => Self::Boolean,
            _ => return None,
        })
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Describes the kind of a JSON value, for violation messages.
fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Errors raised when a schema document is malformed.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The `type` keyword is missing or unknown.
    #[error("schema at {path} has missing or unsupported type")]
    UnsupportedType {
        /// Location of the offending schema.
        path: String,
    },

    /// An `object` schema without `properties`.
    #[error("object schema at {path} must define properties")]
    MissingProperties {
        /// Location of the offending schema.
        path: String,
    },

    /// An `array` schema without `items`.
    #[error("array schema at {path} must define items")]
    MissingItems {
        /// Location of the offending schema.
        path: String,
    },

    /// A keyword has a value of the wrong shape.
    #[error("invalid '{keyword}' in schema at {path}")]
    InvalidKeyword {
        /// Location of the offending schema.
        path: String,
        /// The keyword.
        keyword: &'static str,
    },

    /// The `pattern` keyword is not a valid regular expression.
    #[error("invalid pattern in schema at {path}")]
    InvalidPattern {
        /// Location of the offending schema.
        path: String,
        /// The regex compile error.
        #[source]
        source: regex::Error,
    },
}

/// A compiled `pattern` keyword.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    /// Returns the source text of the pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// A recursive, declarative schema.
///
/// Build schemas with the constructors and chained setters:
///
/// ```
/// use movie_catalog_mcp::mcp::schema::Schema;
///
/// let schema = Schema::object()
///     .property("title", Schema::string().min_length(1))
///     .property("year", Schema::integer().minimum(1888.0))
///     .require(["title"]);
/// assert!(schema.validate(&serde_json::json!({"title": "Alien"})).is_empty());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    kind: SchemaType,
    description: Option<String>,
    properties: IndexMap<String, Schema>,
    required: Vec<String>,
    items: Option<Box<Schema>>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    pattern: Option<Pattern>,
    allowed: Option<Vec<Value>>,
}

impl Schema {
    fn of(kind: SchemaType) -> Self {
        Self {
            kind,
            description: None,
            properties: IndexMap::new(),
            required: Vec::new(),
            items: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            pattern: None,
            allowed: None,
        }
    }

    /// An object schema with no properties yet.
    #[must_use]
    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    /// An array schema whose elements must match `items`.
    #[must_use]
    pub fn array(items: Self) -> Self {
        let mut schema = Self::of(SchemaType::Array);
        schema.items = Some(Box::new(items));
        schema
    }

    /// A string schema.
    #[must_use]
    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    /// An integer schema.
    #[must_use]
    pub fn integer() -> Self {
        Self::of(SchemaType::Integer)
    }

    /// A number schema.
    #[must_use]
    pub fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    /// A boolean schema.
    #[must_use]
    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares (or replaces) a property on an object schema.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, schema: Self) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Marks properties as required. Duplicates are ignored.
    #[must_use]
    pub fn require<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.required.contains(&name) {
                self.required.push(name);
            }
        }
        self
    }

    /// Sets the inclusive lower bound for numeric values.
    #[must_use]
    pub fn minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    /// Sets the inclusive upper bound for numeric values.
    #[must_use]
    pub fn maximum(mut self, maximum: f64) -> Self {
        self.maximum = Some(maximum);
        self
    }

    /// Sets the minimum string length, in characters.
    #[must_use]
    pub fn min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    /// Sets the maximum string length, in characters.
    #[must_use]
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Sets a regular expression strings must contain a match for.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern does not compile.
    pub fn pattern(mut self, pattern: &str) -> Result<Self, SchemaError> {
        let regex = Regex::new(pattern).map_err(|source| SchemaError::InvalidPattern {
            path: "$".to_string(),
            source,
        })?;
        self.pattern = Some(Pattern(regex));
        Ok(self)
    }

    /// Restricts values to the given set (compared by value).
    #[must_use]
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the expected type.
    #[must_use]
    pub const fn kind(&self) -> SchemaType {
        self.kind
    }

    /// Returns the declared properties, in declaration order.
    #[must_use]
    pub const fn properties(&self) -> &IndexMap<String, Self> {
        &self.properties
    }

    /// Returns the required property names.
    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Returns the element schema of an array schema.
    #[must_use]
    pub fn items(&self) -> Option<&Self> {
        self.items.as_deref()
    }

    /// Validates `value` against this schema. See [`validate`].
    #[must_use]
    pub fn validate(&self, value: &Value) -> Vec<Violation> {
        validate(self, value)
    }

    /// Parses a JSON Schema document restricted to the supported keywords.
    ///
    /// Unknown keywords are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the type is missing or unsupported, if an object
    /// schema has no `properties`, if an array schema has no `items`, or if
    /// a keyword has the wrong shape.
    pub fn from_json(document: &Value) -> Result<Self, SchemaError> {
        Self::parse_at(document, "$")
    }

    fn parse_at(document: &Value, path: &str) -> Result<Self, SchemaError> {
        let invalid = |keyword| SchemaError::InvalidKeyword {
            path: path.to_string(),
            keyword,
        };

        let kind = document
            .get("type")
            .and_then(Value::as_str)
            .and_then(SchemaType::parse)
            .ok_or_else(|| SchemaError::UnsupportedType {
                path: path.to_string(),
            })?;
        let mut schema = Self::of(kind);

        if let Some(description) = document.get("description") {
            let description = description.as_str().ok_or_else(|| invalid("description"))?;
            schema.description = Some(description.to_string());
        }

        match kind {
            SchemaType::Object => {
                let properties = document
                    .get("properties")
                    .ok_or_else(|| SchemaError::MissingProperties {
                        path: path.to_string(),
                    })?
                    .as_object()
                    .ok_or_else(|| invalid("properties"))?;
                for (name, sub) in properties {
                    let sub = Self::parse_at(sub, &format!("{path}.{name}"))?;
                    schema.properties.insert(name.clone(), sub);
                }
                if let Some(required) = document.get("required") {
                    let names = required.as_array().ok_or_else(|| invalid("required"))?;
                    let names = names
                        .iter()
                        .map(|n| n.as_str().ok_or_else(|| invalid("required")))
                        .collect::<Result<Vec<_>, _>>()?;
                    schema = schema.require(names);
                }
            }
            SchemaType::Array => {
                let items = document
                    .get("items")
                    .ok_or_else(|| SchemaError::MissingItems {
                        path: path.to_string(),
                    })?;
                schema.items = Some(Box::new(Self::parse_at(items, &format!("{path}[]"))?));
            }
            _ => {}
        }

        if let Some(minimum) = document.get("minimum") {
            schema.minimum = Some(minimum.as_f64().ok_or_else(|| invalid("minimum"))?);
        }
        if let Some(maximum) = document.get("maximum") {
            schema.maximum = Some(maximum.as_f64().ok_or_else(|| invalid("maximum"))?);
        }
        if let Some(min_length) = document.get("minLength") {
            let n = min_length.as_u64().ok_or_else(|| invalid("minLength"))?;
            schema.min_length = Some(usize::try_from(n).map_err(|_| invalid("minLength"))?);
        }
        if let Some(max_length) = document.get("maxLength") {
            let n = max_length.as_u64().ok_or_else(|| invalid("maxLength"))?;
            schema.max_length = Some(usize::try_from(n).map_err(|_| invalid("maxLength"))?);
        }
        if let Some(pattern) = document.get("pattern") {
            let pattern = pattern.as_str().ok_or_else(|| invalid("pattern"))?;
            let regex = Regex::new(pattern).map_err(|source| SchemaError::InvalidPattern {
                path: path.to_string(),
                source,
            })?;
            schema.pattern = Some(Pattern(regex));
        }
        if let Some(allowed) = document.get("enum") {
            let allowed = allowed.as_array().ok_or_else(|| invalid("enum"))?;
            schema.allowed = Some(allowed.clone());
        }

        Ok(schema)
    }

    /// Renders this schema as a JSON Schema document.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.kind)?;
        if let Some(description) = &self.description {
            map.serialize_entry("description", description)?;
        }
        if self.kind == SchemaType::Object {
            map.serialize_entry("properties", &self.properties)?;
            if !self.required.is_empty() {
                map.serialize_entry("required", &self.required)?;
            }
        }
        if let Some(items) = &self.items {
            map.serialize_entry("items", items)?;
        }
        if let Some(minimum) = self.minimum {
            map.serialize_entry("minimum", &minimum)?;
        }
        if let Some(maximum) = self.maximum {
            map.serialize_entry("maximum", &maximum)?;
        }
        if let Some(min_length) = self.min_length {
            map.serialize_entry("minLength", &min_length)?;
        }
        if let Some(max_length) = self.max_length {
            map.serialize_entry("maxLength", &max_length)?;
        }
        if let Some(pattern) = &self.pattern {
            map.serialize_entry("pattern", pattern.as_str())?;
        }
        if let Some(allowed) = &self.allowed {
            map.serialize_entry("enum", allowed)?;
        }
        map.end()
    }
}

/// Why a value failed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ViolationKind {
    /// The value has the wrong runtime kind.
    TypeMismatch {
        /// Expected kind.
        expected: SchemaType,
        /// Actual kind.
        found: &'static str,
    },
    /// A required member is absent or null.
    Missing,
    /// A number is below the inclusive minimum.
    BelowMinimum {
        /// The bound.
        minimum: f64,
    },
    /// A number is above the inclusive maximum.
    AboveMaximum {
        /// The bound.
        maximum: f64,
    },
    /// A string is shorter than allowed.
    TooShort {
        /// The bound, in characters.
        min_length: usize,
    },
    /// A string is longer than allowed.
    TooLong {
        /// The bound, in characters.
        max_length: usize,
    },
    /// A string does not match the pattern.
    PatternMismatch {
        /// The pattern source.
        pattern: String,
    },
    /// The value is not one of the allowed values.
    NotAllowed {
        /// The allowed values.
        allowed: Vec<Value>,
    },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => write!(f, "expected {expected}, found {found}"),
            Self::Missing => f.write_str("required value is missing"),
            Self::BelowMinimum { minimum } => write!(f, "must be at least {minimum}"),
            Self::AboveMaximum { maximum } => write!(f, "must be at most {maximum}"),
            Self::TooShort { min_length } => {
                write!(f, "must be at least {min_length} character(s) long")
            }
            Self::TooLong { max_length } => {
                write!(f, "must be at most {max_length} character(s) long")
            }
            Self::PatternMismatch { pattern } => write!(f, "must match pattern {pattern}"),
            Self::NotAllowed { allowed } => {
                let allowed: Vec<String> = allowed.iter().map(Value::to_string).collect();
                write!(f, "must be one of {}", allowed.join(", "))
            }
        }
    }
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    /// Where the failure occurred, e.g. `$.cast[2].name`.
    pub path: String,
    /// What went wrong.
    #[serde(flatten)]
    pub kind: ViolationKind,
    /// Human-readable summary of `kind`.
    pub message: String,
}

impl Violation {
    fn new(path: &str, kind: ViolationKind) -> Self {
        Self {
            path: path.to_string(),
            message: kind.to_string(),
            kind,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Checks `value` against `schema` and returns every violation found.
///
/// An empty list means the value is valid. A type mismatch is reported once
/// and stops further checks on that subtree. Unknown object members are
/// ignored.
#[must_use]
pub fn validate(schema: &Schema, value: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();
    check(schema, value, "$", &mut violations);
    violations
}

fn check(schema: &Schema, value: &Value, path: &str, out: &mut Vec<Violation>) {
    if !schema.kind.matches(value) {
        out.push(Violation::new(
            path,
            ViolationKind::TypeMismatch {
                expected: schema.kind,
                found: kind_of(value),
            },
        ));
        return;
    }

    if let Some(allowed) = &schema.allowed {
        if !allowed.iter().any(|candidate| values_equal(candidate, value)) {
            out.push(Violation::new(
                path,
                ViolationKind::NotAllowed {
                    allowed: allowed.clone(),
                },
            ));
        }
    }

    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_f64() {
                check_range(schema, v, path, out);
            }
        }
        Value::String(s) => check_string(schema, s, path, out),
        Value::Array(elements) => {
            if let Some(items) = &schema.items {
                for (index, element) in elements.iter().enumerate() {
                    check(items, element, &format!("{path}[{index}]"), out);
                }
            }
        }
        Value::Object(members) => {
            for (name, sub) in &schema.properties {
                let member = members.get(name).filter(|v| !v.is_null());
                let member_path = format!("{path}.{name}");
                match member {
                    Some(member) => check(sub, member, &member_path, out),
                    None if schema.required.contains(name) => {
                        out.push(Violation::new(&member_path, ViolationKind::Missing));
                    }
                    None => {}
                }
            }
            // Required names without a declared property still have to be present.
            for name in &schema.required {
                if !schema.properties.contains_key(name)
                    && members.get(name).map_or(true, Value::is_null)
                {
                    out.push(Violation::new(&format!("{path}.{name}"), ViolationKind::Missing));
                }
            }
        }
        Value::Null | Value::Bool(_) => {}
    }
}

fn check_range(schema: &Schema, value: f64, path: &str, out: &mut Vec<Violation>) {
    if let Some(minimum) = schema.minimum {
        if value < minimum {
            out.push(Violation::new(path, ViolationKind::BelowMinimum { minimum }));
        }
    }
    if let Some(maximum) = schema.maximum {
        if value > maximum {
            out.push(Violation::new(path, ViolationKind::AboveMaximum { maximum }));
        }
    }
}

fn check_string(schema: &Schema, value: &str, path: &str, out: &mut Vec<Violation>) {
    let length = value.chars().count();
    if let Some(min_length) = schema.min_length {
        if length < min_length {
            out.push(Violation::new(path, ViolationKind::TooShort { min_length }));
        }
    }
    if let Some(max_length) = schema.max_length {
        if length > max_length {
            out.push(Violation::new(path, ViolationKind::TooLong { max_length }));
        }
    }
    if let Some(pattern) = &schema.pattern {
        if !pattern.0.is_match(value) {
            out.push(Violation::new(
                path,
                ViolationKind::PatternMismatch {
                    pattern: pattern.as_str().to_string(),
                },
            ));
        }
    }
}

/// Value equality that treats `3` and `3.0` as the same number.
#[allow(clippy::float_cmp)]
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}
