use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Reserved aspect tags.
pub mod aspects {
    /// Marks a node as the checked-out working copy of another node.
    pub const WORKING_COPY: &str = "dv:workingCopy";
    /// Marks a node whose history is tracked as numbered versions.
    pub const VERSIONABLE: &str = "dv:versionable";
}

/// Reserved property names.
pub mod properties {
    /// Authority that checked out a working copy.
    pub const WORKING_COPY_OWNER: &str = "dv:workingCopyOwner";
    /// Slash-delimited path whose last segment is the UUID of the copy source.
    pub const COPIED_FROM: &str = "dv:copiedFrom";
    /// Human-readable node name.
    pub const NAME: &str = "dv:name";
}

/// Generic runtime value type for node properties and operation arguments.
///
/// Supports all JSON-compatible types plus binary data. Serializes as plain
/// JSON; `Bytes` is written as `{"$bytes": [octets]}` and read back as
/// `Bytes`, so binary arguments keep their type across the HTTP adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON integer (signed 64-bit).
    Int(i64),
    /// JSON floating-point (64-bit IEEE 754).
    Float(f64),
    /// JSON string (UTF-8).
    String(String),
    /// Binary payload (content streams, signatures).
    Bytes(Vec<u8>),
    /// JSON array (ordered sequence of values).
    Array(Vec<Value>),
    /// JSON object. `BTreeMap` keeps serialization order deterministic.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the string slice if this is a `Value::String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is a `Value::Int`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the map if this is a `Value::Map`.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value is (or contains) a binary payload.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        match self {
            Value::Bytes(_) => true,
            Value::Array(items) => items.iter().any(Value::is_binary),
            Value::Map(entries) => entries.values().any(Value::is_binary),
            _ => false,
        }
    }

    /// Converts to a `serde_json::Value`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(bytes) => {
                let octets = bytes.iter().map(|b| serde_json::Value::from(*b)).collect();
                let mut tagged = serde_json::Map::new();
                tagged.insert(BYTES_KEY.to_string(), serde_json::Value::Array(octets));
                serde_json::Value::Object(tagged)
            }
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(entries) => match tagged_bytes(&entries) {
                Some(bytes) => Value::Bytes(bytes),
                None => Value::Map(entries.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
            },
        }
    }
}

/// Wire key marking a binary payload.
const BYTES_KEY: &str = "$bytes";

/// Octets of a `{"$bytes": [...]}` object; `None` for any other object.
fn tagged_bytes(entries: &serde_json::Map<String, serde_json::Value>) -> Option<Vec<u8>> {
    if entries.len() != 1 {
        return None;
    }
    entries
        .get(BYTES_KEY)?
        .as_array()?
        .iter()
        .map(|octet| octet.as_u64().and_then(|o| u8::try_from(o).ok()))
        .collect()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// Authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Authority name, without the tenant suffix.
    pub id: String,
    /// Roles assigned to this principal for authorization checks.
    pub roles: Vec<String>,
}

/// Relationship kind of an association, seen from the node that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssociationKind {
    Parent,
    Child,
    Source,
    Target,
}

/// Typed, named edge from the owning node to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Association type (e.g. `"dv:contains"`).
    pub assoc_type: String,
    /// Association name, unique among the parent's children.
    pub name: String,
    pub kind: AssociationKind,
    /// The node at the other end of the edge.
    pub target: Uuid,
    /// A hard association is load-bearing for the node's reachability.
    pub hard: bool,
}

impl Association {
    /// Creates a hard `PARENT` association pointing at `parent`.
    #[must_use]
    pub fn primary_parent(assoc_type: &str, name: &str, parent: Uuid) -> Self {
        Self {
            assoc_type: assoc_type.to_string(),
            name: name.to_string(),
            kind: AssociationKind::Parent,
            target: parent,
            hard: true,
        }
    }
}

/// Access-control descriptor evaluated by the permission engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    pub owner: Option<String>,
    /// Whether permissions are inherited from the primary parent.
    pub inherit: bool,
    pub readers: BTreeSet<String>,
    pub writers: BTreeSet<String>,
}

/// Versionable state of a node: its properties and aspects.
///
/// Working-copy bookkeeping (the working-copy aspect, owner and source
/// reference) is never part of a node's metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub properties: BTreeMap<String, Value>,
    pub aspects: BTreeSet<String>,
}

/// Content-bearing repository entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub uuid: Uuid,
    pub node_type: String,
    pub aspects: BTreeSet<String>,
    pub properties: BTreeMap<String, Value>,
    pub associations: Vec<Association>,
    pub acl: AccessControl,
    /// Soft-deleted nodes are kept until purged.
    #[serde(default)]
    pub deleted: bool,
}

impl Node {
    /// Creates a node with a fresh UUID and no associations.
    #[must_use]
    pub fn new(node_type: &str) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            node_type: node_type.to_string(),
            aspects: BTreeSet::new(),
            properties: BTreeMap::new(),
            associations: Vec::new(),
            acl: AccessControl::default(),
            deleted: false,
        }
    }

    #[must_use]
    pub fn has_aspect(&self, aspect: &str) -> bool {
        self.aspects.contains(aspect)
    }

    #[must_use]
    pub fn is_working_copy(&self) -> bool {
        self.has_aspect(aspects::WORKING_COPY)
    }

    /// Returns the string value of a property, if present.
    #[must_use]
    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(Value::as_str)
    }

    /// The first hard `PARENT` association, if any.
    #[must_use]
    pub fn primary_parent(&self) -> Option<&Association> {
        self.associations
            .iter()
            .find(|a| a.kind == AssociationKind::Parent && a.hard)
    }

    /// UUID of the node this one was copied from: the last segment of the
    /// source-reference path.
    #[must_use]
    pub fn copied_from(&self) -> Option<Uuid> {
        self.property_str(properties::COPIED_FROM)
            .and_then(|path| path.rsplit('/').next())
            .and_then(|segment| Uuid::parse_str(segment).ok())
    }

    /// Snapshot of the versionable state.
    #[must_use]
    pub fn metadata(&self) -> NodeMetadata {
        let mut props = self.properties.clone();
        props.remove(properties::WORKING_COPY_OWNER);
        props.remove(properties::COPIED_FROM);
        let mut tags = self.aspects.clone();
        tags.remove(aspects::WORKING_COPY);
        NodeMetadata {
            properties: props,
            aspects: tags,
        }
    }

    /// Replaces the live metadata with `metadata`, keeping any working-copy
    /// bookkeeping this node already carries.
    pub fn apply_metadata(&mut self, metadata: &NodeMetadata) {
        let owner = self.properties.remove(properties::WORKING_COPY_OWNER);
        let source = self.properties.remove(properties::COPIED_FROM);
        let was_working_copy = self.is_working_copy();

        self.properties.clone_from(&metadata.properties);
        self.aspects.clone_from(&metadata.aspects);

        if let Some(owner) = owner {
            self.properties
                .insert(properties::WORKING_COPY_OWNER.to_string(), owner);
        }
        if let Some(source) = source {
            self.properties
                .insert(properties::COPIED_FROM.to_string(), source);
        }
        if was_working_copy {
            self.aspects.insert(aspects::WORKING_COPY.to_string());
        }
    }
}

/// How a node is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteMode {
    /// Mark deleted; recoverable until purged.
    Soft,
    /// Remove the node itself.
    Purge,
    /// Remove the node and, recursively, every node it hard-parents.
    PurgeComplete,
}

/// Error for a delete-mode code outside `0..=2`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid delete mode {0}: expected 0 (soft), 1 (purge) or 2 (purge-complete)")]
pub struct InvalidDeleteMode(pub i64);

impl TryFrom<i64> for DeleteMode {
    type Error = InvalidDeleteMode;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(DeleteMode::Soft),
            1 => Ok(DeleteMode::Purge),
            2 => Ok(DeleteMode::PurgeComplete),
            other => Err(InvalidDeleteMode(other)),
        }
    }
}

impl fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeleteMode::Soft => "soft",
            DeleteMode::Purge => "purge",
            DeleteMode::PurgeComplete => "purge-complete",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_keep_their_type_through_json() {
        let original = Value::Array(vec![Value::Bytes(vec![0, 7, 255]), Value::Int(3)]);
        let wire = serde_json::to_string(&original).unwrap();
        assert_eq!(wire, r#"[{"$bytes":[0,7,255]},3]"#);

        let decoded: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(decoded, original);
        assert!(decoded.is_binary());
    }

    #[test]
    fn bytes_tag_requires_octets_and_a_lone_key() {
        let out_of_range: Value = serde_json::from_str(r#"{"$bytes":[256]}"#).unwrap();
        let extra_key: Value = serde_json::from_str(r#"{"$bytes":[1],"x":1}"#).unwrap();
        assert!(matches!(out_of_range, Value::Map(_)));
        assert!(matches!(extra_key, Value::Map(_)));
        assert!(!extra_key.is_binary());
    }

    fn working_copy_of(source: Uuid) -> Node {
        let mut node = Node::new("dv:document");
        node.aspects.insert(aspects::WORKING_COPY.to_string());
        node.properties.insert(
            properties::COPIED_FROM.to_string(),
            Value::String(format!("/acme/{source}")),
        );
        node.properties.insert(
            properties::WORKING_COPY_OWNER.to_string(),
            Value::from("alice"),
        );
        node
    }

    #[test]
    fn copied_from_reads_last_path_segment() {
        let source = Uuid::new_v4();
        assert_eq!(working_copy_of(source).copied_from(), Some(source));
    }

    #[test]
    fn copied_from_rejects_non_uuid_segment() {
        let mut node = Node::new("dv:document");
        node.properties
            .insert(properties::COPIED_FROM.to_string(), Value::from("/acme/"));
        assert_eq!(node.copied_from(), None);
    }

    #[test]
    fn primary_parent_skips_soft_parents() {
        let mut node = Node::new("dv:document");
        let soft = Uuid::new_v4();
        let hard = Uuid::new_v4();
        node.associations.push(Association {
            hard: false,
            ..Association::primary_parent("dv:contains", "a", soft)
        });
        node.associations
            .push(Association::primary_parent("dv:contains", "b", hard));

        assert_eq!(node.primary_parent().map(|a| a.target), Some(hard));
    }

    #[test]
    fn metadata_excludes_working_copy_bookkeeping() {
        let mut node = working_copy_of(Uuid::new_v4());
        node.properties
            .insert("dv:title".to_string(), Value::from("Quarterly"));

        let metadata = node.metadata();
        assert_eq!(metadata.properties.len(), 1);
        assert!(metadata.aspects.is_empty());
    }

    #[test]
    fn apply_metadata_keeps_working_copy_bookkeeping() {
        let source = Uuid::new_v4();
        let mut node = working_copy_of(source);
        let mut metadata = NodeMetadata::default();
        metadata
            .properties
            .insert("dv:title".to_string(), Value::from("Reverted"));

        node.apply_metadata(&metadata);

        assert!(node.is_working_copy());
        assert_eq!(node.copied_from(), Some(source));
        assert_eq!(node.property_str("dv:title"), Some("Reverted"));
    }

    #[test]
    fn delete_mode_codes() {
        assert_eq!(DeleteMode::try_from(0), Ok(DeleteMode::Soft));
        assert_eq!(DeleteMode::try_from(1), Ok(DeleteMode::Purge));
        assert_eq!(DeleteMode::try_from(2), Ok(DeleteMode::PurgeComplete));
        assert_eq!(DeleteMode::try_from(3), Err(InvalidDeleteMode(3)));
        assert_eq!(DeleteMode::try_from(-1), Err(InvalidDeleteMode(-1)));
    }

    #[test]
    fn value_json_conversion_keeps_structure() {
        let json = serde_json::json!({"a": [1, "two", null], "b": 2.5});
        let value = Value::from(json.clone());
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn binary_detection_is_recursive() {
        let nested = Value::Array(vec![Value::Int(1), Value::Bytes(vec![0xde, 0xad])]);
        assert!(nested.is_binary());
        assert!(!Value::from("text").is_binary());
    }
}
