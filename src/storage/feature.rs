//! Feature and feature type objects.
//!
//! A feature is an ordered set of named, typed attribute values. Every
//! feature is stored as its own JSON blob so identical content always hashes
//! to the same id. Each layer tree also carries a feature type blob that
//! describes the attributes its features declare.
//!
//! The format stored in Git:
//! ```text
//! {
//!   "name": { "type": "string", "value": "Central park" },
//!   "area": { "type": "float", "value": 1523.5 },
//!   "the_geom": { "type": "polygon", "value": "POLYGON ((0 0, 1 0, 1 1, 0 0))" }
//! }
//! ```

use std::fmt;

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{FeatureId, FeatureTypeId};

/// relative tolerance used when comparing floating point values
const FLOAT_TOLERANCE: f64 = 1e-9;

/// Declared type of a feature attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    /// any geometry kind
    Geometry,
}

impl AttributeType {
    /// true for the geometry family of types
    pub fn is_geometry(&self) -> bool {
        matches!(
            self,
            AttributeType::Point
                | AttributeType::LineString
                | AttributeType::Polygon
                | AttributeType::MultiPoint
                | AttributeType::MultiLineString
                | AttributeType::MultiPolygon
                | AttributeType::Geometry
        )
    }

    /// upper-case display name
    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::String => "STRING",
            AttributeType::Integer => "INTEGER",
            AttributeType::Float => "FLOAT",
            AttributeType::Boolean => "BOOLEAN",
            AttributeType::Date => "DATE",
            AttributeType::Point => "POINT",
            AttributeType::LineString => "LINESTRING",
            AttributeType::Polygon => "POLYGON",
            AttributeType::MultiPoint => "MULTIPOINT",
            AttributeType::MultiLineString => "MULTILINESTRING",
            AttributeType::MultiPolygon => "MULTIPOLYGON",
            AttributeType::Geometry => "GEOMETRY",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A geometry held as canonical well-known text.
///
/// Parsing normalizes keyword case, whitespace and number formatting, so two
/// geometries are equal exactly when their canonical text is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Geometry(String);

#[derive(Debug, Clone, Copy, PartialEq)]
enum WktToken {
    Word,
    Number,
    Open,
    Close,
    Comma,
}

impl Geometry {
    /// parse and canonicalize a WKT string
    pub fn from_wkt(wkt: &str) -> StorageResult<Self> {
        let invalid = |reason: &str| StorageError::SchemaViolation(format!("invalid geometry '{}': {}", wkt, reason));

        let mut out = String::with_capacity(wkt.len());
        let mut prev: Option<WktToken> = None;
        let mut depth = 0usize;
        let mut chars = wkt.trim().chars().peekable();

        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                chars.next();
                continue;
            }
            let token = if c.is_ascii_alphabetic() {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if !c.is_ascii_alphabetic() {
                        break;
                    }
                    word.push(c.to_ascii_uppercase());
                    chars.next();
                }
                if matches!(prev, Some(WktToken::Word) | Some(WktToken::Number)) {
                    out.push(' ');
                }
                out.push_str(&word);
                WktToken::Word
            } else if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')) {
                        break;
                    }
                    number.push(c);
                    chars.next();
                }
                let value: f64 = number.parse().map_err(|_| invalid("malformed number"))?;
                if !value.is_finite() {
                    return Err(invalid("non-finite coordinate"));
                }
                // -0 and 0 describe the same coordinate
                let value = if value == 0.0 { 0.0 } else { value };
                if prev == Some(WktToken::Number) {
                    out.push(' ');
                }
                out.push_str(&value.to_string());
                WktToken::Number
            } else {
                chars.next();
                match c {
                    '(' => {
                        if prev == Some(WktToken::Word) {
                            out.push(' ');
                        }
                        depth += 1;
                        out.push('(');
                        WktToken::Open
                    }
                    ')' => {
                        depth = depth.checked_sub(1).ok_or_else(|| invalid("unbalanced parentheses"))?;
                        out.push(')');
                        WktToken::Close
                    }
                    ',' => {
                        out.push_str(", ");
                        WktToken::Comma
                    }
                    other => return Err(invalid(&format!("unexpected character '{}'", other))),
                }
            };
            prev = Some(token);
        }

        if depth != 0 {
            return Err(invalid("unbalanced parentheses"));
        }
        if !out.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return Err(invalid("missing geometry type"));
        }
        Ok(Self(out))
    }

    /// the canonical WKT text
    pub fn as_wkt(&self) -> &str {
        &self.0
    }

    /// the attribute type matching the geometry's kind
    pub fn geometry_type(&self) -> AttributeType {
        let kind = self.0.split([' ', '(']).next().unwrap_or("");
        match kind {
            "POINT" => AttributeType::Point,
            "LINESTRING" => AttributeType::LineString,
            "POLYGON" => AttributeType::Polygon,
            "MULTIPOINT" => AttributeType::MultiPoint,
            "MULTILINESTRING" => AttributeType::MultiLineString,
            "MULTIPOLYGON" => AttributeType::MultiPolygon,
            _ => AttributeType::Geometry,
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(DateTime<FixedOffset>),
    Geometry(Geometry),
}

impl Value {
    /// the type a value of this kind declares when nothing else is known
    pub fn inferred_type(&self) -> AttributeType {
        match self {
            Value::Null | Value::String(_) => AttributeType::String,
            Value::Integer(_) => AttributeType::Integer,
            Value::Float(_) => AttributeType::Float,
            Value::Boolean(_) => AttributeType::Boolean,
            Value::Date(_) => AttributeType::Date,
            Value::Geometry(g) => g.geometry_type(),
        }
    }

    /// check if the value can be stored under the declared type
    pub fn matches(&self, declared: AttributeType) -> bool {
        match (self, declared) {
            (Value::Null, _) => true,
            (Value::String(_), AttributeType::String) => true,
            (Value::Integer(_), AttributeType::Integer) => true,
            (Value::Float(_), AttributeType::Float) => true,
            (Value::Boolean(_), AttributeType::Boolean) => true,
            (Value::Date(_), AttributeType::Date) => true,
            (Value::Geometry(_), AttributeType::Geometry) => true,
            (Value::Geometry(g), t) => g.geometry_type() == t,
            _ => false,
        }
    }

    /// equality used by diffs and merges: floats within a relative
    /// tolerance, dates by instant, geometries by canonical form
    pub fn equivalent(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => {
                a == b || (a - b).abs() <= FLOAT_TOLERANCE * a.abs().max(b.abs())
            }
            _ => self == other,
        }
    }

    fn to_json(&self, name: &str) -> StorageResult<serde_json::Value> {
        let json = match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| StorageError::SchemaViolation(format!("attribute '{}' is not a finite number", name)))?,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Date(d) => serde_json::Value::String(d.to_rfc3339()),
            Value::Geometry(g) => serde_json::Value::String(g.as_wkt().to_string()),
        };
        Ok(json)
    }

    fn from_json(name: &str, json: serde_json::Value, declared: AttributeType) -> StorageResult<Self> {
        let corrupted = || StorageError::CorruptedData {
            path: name.to_string(),
            reason: format!("value does not match declared type {}", declared),
        };
        if json.is_null() {
            return Ok(Value::Null);
        }
        let value = match declared {
            AttributeType::String => Value::String(json.as_str().ok_or_else(corrupted)?.to_string()),
            AttributeType::Integer => Value::Integer(json.as_i64().ok_or_else(corrupted)?),
            AttributeType::Float => Value::Float(json.as_f64().ok_or_else(corrupted)?),
            AttributeType::Boolean => Value::Boolean(json.as_bool().ok_or_else(corrupted)?),
            AttributeType::Date => {
                let text = json.as_str().ok_or_else(corrupted)?;
                Value::Date(DateTime::parse_from_rfc3339(text).map_err(|_| corrupted())?)
            }
            _ => Value::Geometry(Geometry::from_wkt(json.as_str().ok_or_else(corrupted)?)?),
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::String(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Geometry(g) => write!(f, "{}", g),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Geometry> for Value {
    fn from(value: Geometry) -> Self {
        Value::Geometry(value)
    }
}

/// A value together with its declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub value: Value,
    pub attr_type: AttributeType,
}

/// A feature: an ordered mapping from attribute name to typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    attributes: IndexMap<String, Attribute>,
}

impl Feature {
    pub fn new() -> Self {
        Self::default()
    }

    /// builder-style: add an attribute, inferring its type from the value
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// builder-style: add an attribute with an explicit type
    pub fn with_typed(mut self, name: impl Into<String>, value: impl Into<Value>, attr_type: AttributeType) -> Self {
        self.attributes.insert(
            name.into(),
            Attribute {
                value: value.into(),
                attr_type,
            },
        );
        self
    }

    /// set a value, keeping the declared type of an existing attribute
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        match self.attributes.entry(name.into()) {
            indexmap::map::Entry::Occupied(mut entry) => entry.get_mut().value = value,
            indexmap::map::Entry::Vacant(entry) => {
                let attr_type = value.inferred_type();
                entry.insert(Attribute { value, attr_type });
            }
        }
    }

    /// get a value by attribute name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name).map(|a| &a.value)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// the first geometry-typed attribute, if any
    pub fn default_geometry(&self) -> Option<(&str, &Value)> {
        self.attributes
            .iter()
            .find(|(_, a)| a.attr_type.is_geometry())
            .map(|(k, a)| (k.as_str(), &a.value))
    }

    /// the feature type these attributes declare
    pub fn feature_type(&self) -> FeatureType {
        FeatureType {
            attributes: self.attributes.iter().map(|(k, a)| (k.clone(), a.attr_type)).collect(),
        }
    }

    /// check every value against its declared type
    pub fn validate(&self) -> StorageResult<()> {
        for (name, attr) in &self.attributes {
            if name.is_empty() {
                return Err(StorageError::SchemaViolation("attribute name cannot be empty".to_string()));
            }
            if !attr.value.matches(attr.attr_type) {
                return Err(StorageError::SchemaViolation(format!(
                    "attribute '{}' declared {} but holds {:?}",
                    name, attr.attr_type, attr.value
                )));
            }
            if let Value::Float(f) = attr.value {
                if !f.is_finite() {
                    return Err(StorageError::SchemaViolation(format!(
                        "attribute '{}' is not a finite number",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, Value)> for Feature {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut feature = Feature::new();
        for (name, value) in iter {
            feature.set(name, value);
        }
        feature
    }
}

/// The ordered attribute declarations of a layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureType {
    attributes: IndexMap<String, AttributeType>,
}

impl FeatureType {
    pub fn get(&self, name: &str) -> Option<AttributeType> {
        self.attributes.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, AttributeType)> {
        self.attributes.iter().map(|(k, t)| (k.as_str(), *t))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// add declarations for attributes this type doesn't know yet
    ///
    /// returns true if the type changed
    pub fn extend_with(&mut self, feature: &Feature) -> bool {
        let before = self.attributes.len();
        for (name, attr) in feature.iter() {
            if !self.attributes.contains_key(name) {
                self.attributes.insert(name.to_string(), attr.attr_type);
            }
        }
        self.attributes.len() != before
    }
}

/// internal format for JSON serialization
#[derive(Serialize, Deserialize)]
struct StoredAttribute {
    #[serde(rename = "type")]
    attr_type: AttributeType,
    value: serde_json::Value,
}

/// serialize a feature to JSON bytes
///
/// attribute order is preserved so equal features hash equally
pub fn serialize_feature(feature: &Feature) -> StorageResult<Vec<u8>> {
    let mut stored = IndexMap::with_capacity(feature.len());
    for (name, attr) in feature.iter() {
        stored.insert(
            name,
            StoredAttribute {
                attr_type: attr.attr_type,
                value: attr.value.to_json(name)?,
            },
        );
    }
    Ok(serde_json::to_vec_pretty(&stored)?)
}

/// deserialize a feature from JSON bytes
pub fn deserialize_feature(bytes: &[u8]) -> StorageResult<Feature> {
    let stored: IndexMap<String, StoredAttribute> = serde_json::from_slice(bytes)?;
    let mut feature = Feature::new();
    for (name, attr) in stored {
        let value = Value::from_json(&name, attr.value, attr.attr_type)?;
        feature = feature.with_typed(name, value, attr.attr_type);
    }
    Ok(feature)
}

/// write a feature as a blob to the repository
///
/// returns the blob ID (SHA-1 hash of the content)
pub fn put_feature(repo: &git2::Repository, feature: &Feature) -> StorageResult<FeatureId> {
    feature.validate()?;
    let bytes = serialize_feature(feature)?;
    let oid = repo.blob(&bytes)?;
    Ok(FeatureId::new(oid))
}

/// read a feature blob
pub fn get_feature(repo: &git2::Repository, id: FeatureId) -> StorageResult<Feature> {
    let blob = repo
        .find_blob(id.raw())
        .map_err(|_| StorageError::ObjectNotFound(id.to_string()))?;
    deserialize_feature(blob.content())
}

/// write a feature type as a blob
pub fn put_feature_type(repo: &git2::Repository, feature_type: &FeatureType) -> StorageResult<FeatureTypeId> {
    let bytes = serde_json::to_vec_pretty(feature_type)?;
    let oid = repo.blob(&bytes)?;
    Ok(FeatureTypeId::new(oid))
}

/// read a feature type blob
pub fn get_feature_type(repo: &git2::Repository, id: FeatureTypeId) -> StorageResult<FeatureType> {
    let blob = repo
        .find_blob(id.raw())
        .map_err(|_| StorageError::ObjectNotFound(id.to_string()))?;
    Ok(serde_json::from_slice(blob.content())?)
}
