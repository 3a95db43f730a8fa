//! Declared input schemas and validation.
//!
//! Fields carry their secret flag structurally so the sanitizer and the MCP
//! tool listing both read the same source of truth.

use serde_json::Value;

use axon_common::{Error, ErrorKind, Result};

use crate::params::RawParams;

pub const SECRET_PLACEHOLDER: &str = "[[secret]]";

/// Validated parameters: the coalesced, coerced, defaulted field map.
pub type Params = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Json,
    List(Box<FieldKind>),
}

impl FieldKind {
    /// JSON-schema type name, used by the MCP tool listing.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Boolean => "boolean",
            Self::Json => "object",
            Self::List(_) => "array",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub kind: FieldKind,
    pub optional: bool,
    pub secret: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl Field {
    fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            optional: false,
            secret: false,
            default: None,
            description: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn json() -> Self {
        Self::new(FieldKind::Json)
    }

    pub fn list_of(kind: FieldKind) -> Self {
        Self::new(FieldKind::List(Box::new(kind)))
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    #[must_use]
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// Ordered field map. Order matters: validation reports the first failing
/// field, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    fields: Vec<(String, Field)>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn fields(&self) -> &[(String, Field)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Validate raw params against this schema.
    ///
    /// Unknown keys are dropped; declared fields are coerced by kind,
    /// defaults materialize for absent optional-with-default fields, and a
    /// missing required field fails with the key attached.
    pub fn validate(&self, raw: &RawParams) -> Result<Params> {
        let incoming = raw.coalesce();
        let mut out = Params::new();

        for (name, field) in &self.fields {
            match incoming.get(name) {
                Some(value) => {
                    let coerced = coerce(&field.kind, value).ok_or_else(|| {
                        Error::new(
                            ErrorKind::ConnectionActionParamValidation,
                            format!("invalid value for '{name}'"),
                        )
                        .with_key(name.clone())
                        .with_value(value.clone())
                    })?;
                    out.insert(name.clone(), coerced);
                },
                None => {
                    if let Some(default) = &field.default {
                        let coerced = coerce(&field.kind, default).ok_or_else(|| {
                            Error::new(
                                ErrorKind::ConnectionActionParamDefault,
                                format!("default for '{name}' does not match its kind"),
                            )
                            .with_key(name.clone())
                            .with_value(default.clone())
                        })?;
                        out.insert(name.clone(), coerced);
                    } else if !field.optional {
                        return Err(Error::new(
                            ErrorKind::ConnectionActionParamRequired,
                            format!("'{name}' is required"),
                        )
                        .with_key(name.clone()));
                    }
                },
            }
        }

        Ok(out)
    }

    /// Replace secret-marked fields with the redaction placeholder.
    pub fn sanitize(&self, params: &Params) -> Params {
        let mut out = params.clone();
        for (name, field) in &self.fields {
            if field.secret && out.contains_key(name) {
                out.insert(name.clone(), Value::String(SECRET_PLACEHOLDER.into()));
            }
        }
        out
    }

    /// The schema as a JSON-Schema object (the MCP tool shape).
    pub fn to_json_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, field) in &self.fields {
            let mut prop = serde_json::Map::new();
            prop.insert("type".into(), Value::String(field.kind.type_name().into()));
            if let Some(desc) = &field.description {
                prop.insert("description".into(), Value::String(desc.clone()));
            }
            properties.insert(name.clone(), Value::Object(prop));
            if !field.optional && field.default.is_none() {
                required.push(Value::String(name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Coerce one value by kind. A repeated key coerces last-wins for scalar
/// kinds; a scalar wraps into a single-element list for list kinds.
fn coerce(kind: &FieldKind, value: &Value) -> Option<Value> {
    match kind {
        FieldKind::List(item) => {
            let items: Vec<&Value> = match value {
                Value::Array(list) => list.iter().collect(),
                scalar => vec![scalar],
            };
            let mut out = Vec::with_capacity(items.len());
            for entry in items {
                out.push(coerce(item, entry)?);
            }
            Some(Value::Array(out))
        },
        scalar_kind => {
            // Last wins when a scalar field was supplied repeatedly.
            let value = match value {
                Value::Array(list) => list.last()?,
                v => v,
            };
            coerce_scalar(scalar_kind, value)
        },
    }
}

fn coerce_scalar(kind: &FieldKind, value: &Value) -> Option<Value> {
    match (kind, value) {
        (FieldKind::Json, v) => Some(v.clone()),
        (FieldKind::String, Value::String(s)) => Some(Value::String(s.clone())),
        (FieldKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (FieldKind::Integer, Value::Number(n)) => n.as_i64().map(Value::from),
        (FieldKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (FieldKind::Float, Value::Number(n)) => n.as_f64().and_then(|f| {
            serde_json::Number::from_f64(f).map(Value::Number)
        }),
        (FieldKind::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        (FieldKind::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
        (FieldKind::Boolean, Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}
