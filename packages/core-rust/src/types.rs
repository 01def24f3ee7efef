use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::ResError;

/// One edge of a resource graph: a serialized fragment or a reference.
#[derive(Debug, Clone)]
pub enum Value {
    /// Already-serialized JSON (scalar, object, or array), copied through as-is.
    Primitive(Box<RawValue>),
    /// RID of another resource in the same graph.
    ResourceRef(String),
}

/// Shape used to recognize `{"rid": "..."}` in wire values.
#[derive(Deserialize)]
struct RefProbe {
    rid: String,
    #[serde(default)]
    soft: bool,
}

impl Value {
    /// Builds a primitive from any JSON value.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `value` cannot be rendered.
    pub fn primitive(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::value::to_raw_value(value).map(Value::Primitive)
    }

    #[must_use]
    pub fn reference(rid: impl Into<String>) -> Self {
        Value::ResourceRef(rid.into())
    }

    /// Interprets a wire value.
    ///
    /// An object with a string `rid` member is a reference. Soft references
    /// (`"soft": true`) are not followed and stay primitive, as does
    /// everything else.
    #[must_use]
    pub fn from_raw(raw: Box<RawValue>) -> Self {
        if raw.get().trim_start().starts_with('{') {
            if let Ok(RefProbe { rid, soft: false }) = serde_json::from_str(raw.get()) {
                return Value::ResourceRef(rid);
            }
        }
        Value::Primitive(raw)
    }

    /// Returns the referenced RID, if this is a reference.
    #[must_use]
    pub fn rid(&self) -> Option<&str> {
        match self {
            Value::ResourceRef(rid) => Some(rid),
            Value::Primitive(_) => None,
        }
    }
}

/// Current state of a subscribed resource.
#[derive(Debug, Clone)]
pub enum ResourceState {
    /// Named fields. `BTreeMap` keeps iteration order stable.
    Model(BTreeMap<String, Value>),
    /// Ordered values.
    Collection(Vec<Value>),
    /// The resource failed to load. Terminal: nothing below it is visited.
    Error(ResError),
}

impl ResourceState {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceState::Model(_) => "model",
            ResourceState::Collection(_) => "collection",
            ResourceState::Error(_) => "error",
        }
    }
}
