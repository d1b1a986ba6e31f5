//! Input values and references.
//!
//! An input is either a literal, a list or map of inputs, or a reference to
//! another resource's named output. References are recorded here and only
//! resolved by the apply engine.

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const REFERENCE_FIELDS: &[&str] = &["ref", "output"];

/// A pointer to a named output of another resource.
///
/// Serialized as `{ ref: <resource>, output: <field> }`. Only a map with
/// exactly these two keys deserializes as a reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Reference {
    /// Name of the referenced resource.
    #[serde(rename = "ref")]
    pub resource: String,
    /// Output field of the referenced resource.
    pub output: String,
}

/// A declared input value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    /// Reference to another resource's output.
    Ref(Reference),
    /// List of values.
    List(Vec<InputValue>),
    /// Map of values.
    Map(BTreeMap<String, InputValue>),
    /// Scalar literal (string, number, bool, null).
    Literal(serde_json::Value),
}

/// Coarse shape of a value, used for schema checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// A string literal.
    String,
    /// An integer literal.
    Integer,
    /// A boolean literal.
    Bool,
    /// A list.
    List,
    /// A map.
    Map,
    /// Anything.
    Any,
}

impl Reference {
    /// Creates a new reference.
    #[must_use]
    pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            output: output.into(),
        }
    }
}

impl InputValue {
    /// Creates a literal value.
    #[must_use]
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Creates a reference value.
    #[must_use]
    pub fn reference(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Ref(Reference::new(resource, output))
    }

    /// Creates a list value.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Collects every reference embedded in this value, depth first.
    #[must_use]
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a Reference>) {
        match self {
            Self::Ref(reference) => refs.push(reference),
            Self::List(items) => {
                for item in items {
                    item.collect_references(refs);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.collect_references(refs);
                }
            }
            Self::Literal(_) => {}
        }
    }

    /// Returns the literal string, if this is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Literal(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns true if the value matches the expected shape.
    ///
    /// References match any shape; their type is only known once the
    /// referenced resource is applied.
    #[must_use]
    pub fn matches_shape(&self, shape: ValueShape) -> bool {
        match (self, shape) {
            (Self::Ref(_), _) | (_, ValueShape::Any) => true,
            (Self::List(_), ValueShape::List) | (Self::Map(_), ValueShape::Map) => true,
            (Self::Literal(value), ValueShape::String) => value.is_string(),
            (Self::Literal(value), ValueShape::Integer) => value.is_i64() || value.is_u64(),
            (Self::Literal(value), ValueShape::Bool) => value.is_boolean(),
            // Empty YAML sequences and maps can arrive as null.
            (Self::Literal(serde_json::Value::Null), ValueShape::List | ValueShape::Map) => true,
            _ => false,
        }
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ReferenceVisitor)
    }
}

struct ReferenceVisitor;

impl<'de> Visitor<'de> for ReferenceVisitor {
    type Value = Reference;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with `ref` and `output`")
    }

    fn visit_map<A>(self, mut map: A) -> std::result::Result<Reference, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut resource: Option<String> = None;
        let mut output: Option<String> = None;

        while let Some(key) = map.next_key::<String>()? {
            let slot = match key.as_str() {
                "ref" => &mut resource,
                "output" => &mut output,
                other => return Err(de::Error::unknown_field(other, REFERENCE_FIELDS)),
            };
            if slot.is_some() {
                return Err(de::Error::custom(format!("duplicate field `{key}`")));
            }
            *slot = Some(map.next_value()?);
        }

        Ok(Reference {
            resource: resource.ok_or_else(|| de::Error::missing_field("ref"))?,
            output: output.ok_or_else(|| de::Error::missing_field("output"))?,
        })
    }
}

impl From<Reference> for InputValue {
    fn from(reference: Reference) -> Self {
        Self::Ref(reference)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.output)
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        };
        write!(f, "{s}")
    }
}
