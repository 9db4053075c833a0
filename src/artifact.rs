//! Artifact data model for the fluxgraph engine.
//!
//! A [`Graph`] is a versioned bundle of [`Vector`]s. Each vector is an
//! executable unit: it carries a set-handler template, arbitrary
//! author-owned `data`/`properties` payloads, and a list of output
//! [`Edge`]s whose [`Connector`]s reference downstream input fields —
//! possibly in other graphs. Vectors may also be indirections: a
//! [`LinkedVector`] points at a reusable vector artifact, a
//! [`LinkedGraph`] embeds a whole sub-graph behind a field map.
//!
//! These types mirror the JSON artifact format (camelCase keys, vectors
//! under `"vectors"`). The engine performs no validation of parsed
//! artifacts; whatever deserializes is accepted.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of a graph: `(id, version)`.
///
/// Two graphs with the same id but different versions are distinct
/// artifacts; connectors crossing either boundary trigger a graph load.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphKey {
    pub id: String,
    pub version: u64,
}

impl GraphKey {
    pub fn new(id: impl Into<String>, version: u64) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }
}

impl fmt::Display for GraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.version)
    }
}

/// A versioned bundle of vectors.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Graph {
    pub id: String,
    pub url: String,
    pub version: u64,
    pub properties: Value,
    pub vectors: Vec<Vector>,
}

impl Graph {
    pub fn key(&self) -> GraphKey {
        GraphKey::new(self.id.clone(), self.version)
    }

    /// Find a vector by id.
    pub fn vector(&self, id: &str) -> Option<&Vector> {
        self.vectors.iter().find(|v| v.id == id)
    }

    pub fn vector_mut(&mut self, id: &str) -> Option<&mut Vector> {
        self.vectors.iter_mut().find(|v| v.id == id)
    }
}

/// An executable unit within a graph.
///
/// `url` is the pattern-match target for scheduler entry. `edges` are
/// the vector's *outputs*; input fields are just strings the handler
/// inspects. `template.set` holds handler source in the host scripting
/// dialect and may be empty only when a linked graph is present.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Vector {
    pub id: String,
    pub graph_id: String,
    pub version: u64,
    pub url: String,
    pub edges: Vec<Edge>,
    pub template: VectorTemplate,
    pub data: Value,
    pub properties: Value,
    /// Indirection to a reusable vector artifact, resolved on first use.
    #[serde(alias = "linkedNode", skip_serializing_if = "Option::is_none")]
    pub linked_vector: Option<LinkedVector>,
    /// Indirection to an embedded sub-graph with I/O remapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_graph: Option<LinkedGraph>,
}

impl Vector {
    /// Find an output edge by field name.
    pub fn edge(&self, field: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.field == field)
    }

    pub fn edge_mut(&mut self, field: &str) -> Option<&mut Edge> {
        self.edges.iter_mut().find(|e| e.field == field)
    }
}

/// Handler source attached to a vector.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VectorTemplate {
    pub set: String,
}

impl VectorTemplate {
    pub fn new(set: impl Into<String>) -> Self {
        Self { set: set.into() }
    }

    /// True when there is no handler source to compile.
    pub fn is_empty(&self) -> bool {
        self.set.trim().is_empty()
    }
}

/// A named output on a vector carrying a list of connectors.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Edge {
    pub field: String,
    pub connectors: Vec<Connector>,
}

/// A directed reference from an output edge to an input field on another
/// vector, possibly in another graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Connector {
    pub id: String,
    pub vector_id: String,
    pub field: String,
    pub graph_id: String,
    pub version: u64,
}

/// Reference to a reusable vector artifact.
///
/// `loaded` transitions false→true exactly once, when `vector` is
/// populated from the loaded artifact.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkedVector {
    pub id: String,
    pub version: u64,
    pub loaded: bool,
    #[serde(alias = "node", skip_serializing_if = "Option::is_none")]
    pub vector: Option<Box<Vector>>,
}

/// Reference to an embedded sub-graph.
///
/// `data`/`properties` override the matching payloads of inner vectors
/// by id. `fields` maps external field names on the outside of the
/// linked graph to `(inner-vector-id, inner-field-name)` pairs. `loaded`
/// is set only after inner edges have been spliced.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkedGraph {
    pub id: String,
    pub version: u64,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<Box<Graph>>,
    pub data: FxHashMap<String, Value>,
    pub properties: FxHashMap<String, Value>,
    pub fields: FieldMap,
}

/// External-to-internal field mapping on a linked graph boundary.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FieldMap {
    pub inputs: FxHashMap<String, FieldTarget>,
    pub outputs: FxHashMap<String, FieldTarget>,
}

/// An inner coordinate: a vector id plus a field name on that vector.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldTarget {
    pub id: String,
    pub field: String,
}
