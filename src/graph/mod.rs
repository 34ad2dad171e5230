//! Graph model shared by every parser.
//!
//! This module defines the resource graph (`ResourceGraph`, `Node`, `Edge`)
//! together with the typed per-family node payloads and the small helpers the
//! inference passes lean on: `EdgeDedup` for the `(from, to, reason)`
//! uniqueness rule and `Diagnostics` for counting resolution misses.
//!
//! The graph itself is a plain append-only container. `add_node`/`add_edge`
//! never validate; use `ResourceGraph::validate` when you need to check the
//! invariants.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

pub mod resolver;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The inference rule that produced an edge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum EdgeReason {
    #[serde(rename = "depends_on")]
    DependsOn,
    #[serde(rename = "attribute_reference")]
    AttributeReference,
    #[serde(rename = "selector_match")]
    SelectorMatch,
    #[serde(rename = "ingress_backend")]
    IngressBackend,
    #[serde(rename = "envFrom_configmap")]
    EnvFromConfigMap,
    #[serde(rename = "envFrom_secret")]
    EnvFromSecret,
    #[serde(rename = "env_configmap")]
    EnvConfigMap,
    #[serde(rename = "env_secret")]
    EnvSecret,
    #[serde(rename = "volume_configmap")]
    VolumeConfigMap,
    #[serde(rename = "volume_secret")]
    VolumeSecret,
}

impl EdgeReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DependsOn => "depends_on",
            Self::AttributeReference => "attribute_reference",
            Self::SelectorMatch => "selector_match",
            Self::IngressBackend => "ingress_backend",
            Self::EnvFromConfigMap => "envFrom_configmap",
            Self::EnvFromSecret => "envFrom_secret",
            Self::EnvConfigMap => "env_configmap",
            Self::EnvSecret => "env_secret",
            Self::VolumeConfigMap => "volume_configmap",
            Self::VolumeSecret => "volume_secret",
        }
    }
}

impl fmt::Display for EdgeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub attributes: NodePayload,
}

/// Family-specific node payload.
///
/// Known keys are typed; anything the inference passes do not read is kept
/// as an open JSON value (`before`/`after`, `spec`, `metadata.extra`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum NodePayload {
    Terraform(TerraformAttributes),
    Kubernetes(KubernetesAttributes),
    HelmDependency(DependencyAttributes),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TerraformAttributes {
    /// `managed` or `data`
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub module_address: Option<String>,
    #[serde(default)]
    pub index: Option<Value>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub before: Value,
    /// Post-change attribute tree, scanned for embedded references.
    #[serde(default)]
    pub after: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KubernetesAttributes {
    pub kind: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmProvenance>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default, deserialize_with = "string_map")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "string_map")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelmProvenance {
    pub chart: String,
    pub release: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DependencyAttributes {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub chart: String,
}

/// Accept a label-like map whose values may be scalars of any type.
///
/// Scalars are stringified, `null` and nested values are dropped, and a
/// non-map input yields an empty map.
pub(crate) fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(scalar_map(&raw))
}

pub(crate) fn scalar_map(raw: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Value::Object(map) = raw {
        for (k, v) in map {
            let s = match v {
                Value::String(s) => s.clone(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            out.insert(k.clone(), s);
        }
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from_id: NodeId,
    pub to_id: NodeId,
    pub reason: EdgeReason,
}

impl Edge {
    #[must_use]
    pub fn new(from_id: NodeId, to_id: NodeId, reason: EdgeReason) -> Self {
        Self { from_id, to_id, reason }
    }
}

/// Tracks `(from, to, reason)` triples already present so passes never
/// append a duplicate edge.
#[derive(Debug, Default)]
pub struct EdgeDedup {
    seen: HashSet<(NodeId, NodeId, EdgeReason)>,
}

impl EdgeDedup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the edges a graph already holds.
    #[must_use]
    pub fn seeded(edges: &[Edge]) -> Self {
        let mut seen = HashSet::with_capacity(edges.len());
        for e in edges {
            seen.insert((e.from_id.clone(), e.to_id.clone(), e.reason));
        }
        Self { seen }
    }

    /// Returns true the first time a triple is seen.
    pub fn admit(&mut self, edge: &Edge) -> bool {
        self.seen.insert((edge.from_id.clone(), edge.to_id.clone(), edge.reason))
    }
}

/// Resolution misses and skipped inputs for one parse run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub unresolved_references: usize,
    pub unresolved_selectors: usize,
    pub unresolved_backends: usize,
    pub unresolved_config_refs: usize,
    pub skipped_documents: usize,
    pub duplicate_nodes: usize,
}

impl Diagnostics {
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "unresolved_references": self.unresolved_references,
            "unresolved_selectors": self.unresolved_selectors,
            "unresolved_backends": self.unresolved_backends,
            "unresolved_config_refs": self.unresolved_config_refs,
            "skipped_documents": self.skipped_documents,
            "duplicate_nodes": self.duplicate_nodes,
        })
    }

    pub fn absorb(&mut self, other: &Diagnostics) {
        self.unresolved_references += other.unresolved_references;
        self.unresolved_selectors += other.unresolved_selectors;
        self.unresolved_backends += other.unresolved_backends;
        self.unresolved_config_refs += other.unresolved_config_refs;
        self.skipped_documents += other.skipped_documents;
        self.duplicate_nodes += other.duplicate_nodes;
    }
}

/// Invariant violation reported by `ResourceGraph::validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphIssue {
    DuplicateNode(NodeId),
    DanglingEdge(Edge),
    DuplicateEdge(Edge),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResourceGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

impl ResourceGraph {
    /// Empty graph whose `meta.parser` names the producing family.
    #[must_use]
    pub fn new(parser: &str) -> Self {
        let mut graph = Self::default();
        graph.set_meta("parser", Value::String(parser.to_string()));
        graph
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn set_meta(&mut self, key: &str, value: Value) {
        self.meta.insert(key.to_string(), value);
    }

    pub fn record_diagnostics(&mut self, diagnostics: &Diagnostics) {
        self.set_meta("diagnostics", diagnostics.to_value());
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    #[must_use]
    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }

    /// Edges carrying the given reason, in insertion order.
    pub fn edges_with_reason(&self, reason: EdgeReason) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.reason == reason)
    }

    /// Check node-id uniqueness, edge endpoints and edge uniqueness.
    ///
    /// Returns every violation found; an empty vector means the graph is well formed.
    #[must_use]
    pub fn validate(&self) -> Vec<GraphIssue> {
        let mut issues = Vec::new();
        let mut ids: HashSet<&NodeId> = HashSet::with_capacity(self.nodes.len());
        for n in &self.nodes {
            if !ids.insert(&n.id) {
                issues.push(GraphIssue::DuplicateNode(n.id.clone()));
            }
        }
        let mut dedup = EdgeDedup::new();
        for e in &self.edges {
            if !ids.contains(&e.from_id) || !ids.contains(&e.to_id) {
                issues.push(GraphIssue::DanglingEdge(e.clone()));
            }
            if !dedup.admit(e) {
                issues.push(GraphIssue::DuplicateEdge(e.clone()));
            }
        }
        issues
    }

    /// Serialize as `{"nodes": [...], "edges": [...], "meta": {...}}`.
    ///
    /// # Errors
    /// Returns `GraphError::Serialize` if a payload value cannot be encoded.
    pub fn to_json_string(&self, pretty: bool) -> Result<String, crate::errors::GraphError> {
        let s = if pretty { serde_json::to_string_pretty(self)? } else { serde_json::to_string(self)? };
        Ok(s)
    }

    /// Save the graph as JSON.
    ///
    /// # Errors
    /// Returns `GraphError` if serialization or writing the file fails.
    pub fn save_json(&self, path: &Path, pretty: bool) -> Result<(), crate::errors::GraphError> {
        let data = self.to_json_string(pretty)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Load a graph from a JSON file.
    ///
    /// # Errors
    /// Returns `GraphError` if reading the file fails or JSON is invalid.
    pub fn load_json(path: &Path) -> Result<Self, crate::errors::GraphError> {
        let data = std::fs::read_to_string(path)?;
        let graph: ResourceGraph = serde_json::from_str(&data)?;
        Ok(graph)
    }
}
