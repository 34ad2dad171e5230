//! Kubernetes manifests to resource graph.
//!
//! Documents become nodes first; relationship inference runs afterwards over
//! the complete node set in three independent passes (service selectors,
//! ingress backends, config references). See `infer_relationships`.
use rayon::prelude::*;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::ParseError;
use crate::graph::{
    scalar_map, string_map, Diagnostics, Edge, EdgeDedup, EdgeReason, KubernetesAttributes,
    Node, NodeId, NodePayload, ObjectMeta, ResourceGraph,
};

const FAMILY: &str = "kubernetes";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Kinds a Service selector may bind to.
const SELECTABLE_KINDS: &[&str] = &["deployment", "statefulset", "daemonset", "pod"];

#[must_use]
pub fn node_id(kind: &str, namespace: &str, name: &str) -> NodeId {
    NodeId(format!("k8s:{}:{namespace}/{name}", kind.to_lowercase()))
}

#[derive(Debug, Clone)]
pub struct KubernetesParser {
    default_namespace: String,
}

impl Default for KubernetesParser {
    fn default() -> Self {
        Self { default_namespace: DEFAULT_NAMESPACE.to_string() }
    }
}

impl KubernetesParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace given to objects that do not declare one.
    #[must_use]
    pub fn with_default_namespace(namespace: impl Into<String>) -> Self {
        Self { default_namespace: namespace.into() }
    }

    /// Parse several manifest files into one graph.
    ///
    /// Files are read and decoded in parallel; nodes are then created in input
    /// order. A file or document that fails is recorded in `meta.errors` and
    /// does not affect its siblings, so this never fails as a whole.
    #[must_use]
    pub fn parse_files(&self, paths: &[PathBuf]) -> ResourceGraph {
        let decoded: Vec<(String, Result<Vec<Result<Value, ParseError>>, ParseError>)> = paths
            .par_iter()
            .map(|p| {
                let docs = std::fs::read_to_string(p)
                    .map(|text| decode_documents(&text))
                    .map_err(ParseError::from);
                (p.display().to_string(), docs)
            })
            .collect();

        let mut builder = GraphBuilder::new(self);
        for (source, docs) in decoded {
            match docs {
                Ok(docs) => builder.add_documents(docs, Some(&source)),
                Err(e) => {
                    warn!("Failed to read {source}: {e}");
                    builder.record_error(Some(&source), &e);
                }
            }
        }
        let sources: Vec<Value> = paths.iter().map(|p| Value::String(p.display().to_string())).collect();
        builder.finish(Some(sources))
    }

    /// Parse one block of (possibly multi-document) manifest text.
    #[must_use]
    pub fn parse_str(&self, text: &str, source: Option<&str>) -> ResourceGraph {
        let mut builder = GraphBuilder::new(self);
        builder.add_documents(decode_documents(text), source);
        let sources = source.map(|s| vec![Value::String(s.to_string())]);
        builder.finish(sources)
    }

    /// Parse already-decoded documents.
    #[must_use]
    pub fn parse_documents(&self, docs: Vec<Value>) -> ResourceGraph {
        let mut builder = GraphBuilder::new(self);
        builder.add_documents(docs.into_iter().map(Ok).collect(), None);
        builder.finish(None)
    }
}

/// Split manifest text on `---` separator lines and decode each document.
///
/// Empty and comment-only documents are dropped. A syntax error only costs
/// the document it occurs in.
#[must_use]
pub fn decode_documents(text: &str) -> Vec<Result<Value, ParseError>> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if is_separator(line) {
            chunks.push(std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    chunks.push(current);

    chunks
        .iter()
        .filter(|c| c.lines().any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#')))
        .filter_map(|c| match serde_yaml::from_str::<Value>(c) {
            Ok(Value::Null) => None,
            Ok(v) => Some(Ok(v)),
            Err(e) => Some(Err(ParseError::from(e))),
        })
        .collect()
}

fn is_separator(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("---") else { return false };
    let rest = rest.trim();
    rest.is_empty() || rest.starts_with('#')
}

struct GraphBuilder<'p> {
    parser: &'p KubernetesParser,
    graph: ResourceGraph,
    seen: HashSet<NodeId>,
    diagnostics: Diagnostics,
    errors: Vec<Value>,
}

impl<'p> GraphBuilder<'p> {
    fn new(parser: &'p KubernetesParser) -> Self {
        Self {
            parser,
            graph: ResourceGraph::new(FAMILY),
            seen: HashSet::new(),
            diagnostics: Diagnostics::default(),
            errors: Vec::new(),
        }
    }

    fn record_error(&mut self, source: Option<&str>, err: &ParseError) {
        self.errors.push(json!({"source": source, "error": err.to_string()}));
    }

    fn add_documents(&mut self, docs: Vec<Result<Value, ParseError>>, source: Option<&str>) {
        for doc in docs {
            match doc {
                Ok(v) => self.add_document(v, source),
                Err(e) => {
                    warn!("Skipping undecodable document in {}: {e}", source.unwrap_or("<input>"));
                    self.diagnostics.skipped_documents += 1;
                    self.record_error(source, &e);
                }
            }
        }
    }

    fn add_document(&mut self, mut doc: Value, source: Option<&str>) {
        let Some(obj) = doc.as_object_mut() else { return };

        if obj.get("kind").and_then(Value::as_str) == Some("List") {
            if let Some(Value::Array(items)) = obj.remove("items") {
                for item in items {
                    self.add_document(item, source);
                }
            }
            return;
        }

        let kind = match obj.get("kind").and_then(Value::as_str) {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => {
                debug!("Skipping document without kind");
                return;
            }
        };
        let Some(meta_value) = obj
            .remove("metadata")
            .filter(|m| m.as_object().is_some_and(|o| !o.is_empty()))
        else {
            debug!("Skipping {kind} without metadata");
            return;
        };
        let mut metadata = ObjectMeta::deserialize(&meta_value).unwrap_or_else(|e| {
            debug!("Untyped metadata on {kind}: {e}");
            ObjectMeta::default()
        });

        let name = metadata.name.clone().unwrap_or_else(|| "unknown".to_string());
        let namespace = metadata
            .namespace
            .clone()
            .unwrap_or_else(|| self.parser.default_namespace.clone());
        metadata.namespace = Some(namespace.clone());

        let kind_lower = kind.to_lowercase();
        let id = node_id(&kind_lower, &namespace, &name);
        if !self.seen.insert(id.clone()) {
            warn!("Duplicate object {id}; keeping the first");
            self.diagnostics.duplicate_nodes += 1;
            return;
        }

        let api_version = obj.get("apiVersion").and_then(Value::as_str).unwrap_or_default().to_string();
        let spec = obj.remove("spec").unwrap_or(Value::Null);
        self.graph.add_node(Node {
            id,
            node_type: format!("k8s.{kind_lower}"),
            name,
            namespace: Some(namespace),
            attributes: NodePayload::Kubernetes(KubernetesAttributes {
                kind,
                api_version,
                source_file: source.map(str::to_string),
                metadata,
                spec,
                helm: None,
            }),
        });
    }

    fn finish(mut self, sources: Option<Vec<Value>>) -> ResourceGraph {
        debug!("Kubernetes: {} nodes created", self.graph.nodes.len());
        let inferred = infer_relationships(&mut self.graph);
        self.diagnostics.absorb(&inferred);
        if let Some(sources) = sources {
            self.graph.set_meta("sources", Value::Array(sources));
        }
        self.graph.set_meta("errors", Value::Array(self.errors));
        self.graph.record_diagnostics(&self.diagnostics);
        self.graph
    }
}

/// Lookup of Kubernetes nodes by full id and by `namespace/name`.
#[derive(Debug, Default)]
pub struct ObjectIndex<'g> {
    by_id: HashMap<&'g str, &'g Node>,
    by_scoped_name: HashMap<String, &'g Node>,
}

impl<'g> ObjectIndex<'g> {
    #[must_use]
    pub fn build(graph: &'g ResourceGraph) -> Self {
        let mut index = Self::default();
        for node in &graph.nodes {
            if !matches!(node.attributes, NodePayload::Kubernetes(_)) {
                continue;
            }
            index.by_id.entry(node.id.as_str()).or_insert(node);
            let ns = node.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE);
            index.by_scoped_name.entry(format!("{ns}/{}", node.name)).or_insert(node);
        }
        index
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&'g Node> {
        self.by_id.get(id.as_str()).copied()
    }

    /// First object registered under `namespace/name`, whatever its kind.
    #[must_use]
    pub fn get_scoped(&self, namespace: &str, name: &str) -> Option<&'g Node> {
        self.by_scoped_name.get(&format!("{namespace}/{name}")).copied()
    }

    fn find(&self, kind: &str, namespace: &str, name: &str) -> Option<&'g Node> {
        self.get(&node_id(kind, namespace, name))
    }
}

/// Run the selector, ingress and config-reference passes over every
/// Kubernetes node in `graph`, appending edges not already present.
///
/// Misses never fail; they are counted in the returned diagnostics.
pub fn infer_relationships(graph: &mut ResourceGraph) -> Diagnostics {
    let mut diagnostics = Diagnostics::default();
    let produced = {
        let index = ObjectIndex::build(graph);
        let mut sink = EdgeSink { dedup: EdgeDedup::seeded(&graph.edges), edges: Vec::new() };
        let k8s: Vec<(&Node, &KubernetesAttributes)> = graph
            .nodes
            .iter()
            .filter_map(|n| match &n.attributes {
                NodePayload::Kubernetes(a) => Some((n, a)),
                _ => None,
            })
            .collect();

        match_selectors(&k8s, &mut sink, &mut diagnostics);
        resolve_ingress_backends(&k8s, &index, &mut sink, &mut diagnostics);
        scan_config_references(&k8s, &index, &mut sink, &mut diagnostics);
        sink.edges
    };
    debug!("Kubernetes: {} relationship edges", produced.len());
    for e in produced {
        graph.add_edge(e);
    }
    diagnostics
}

struct EdgeSink {
    dedup: EdgeDedup,
    edges: Vec<Edge>,
}

impl EdgeSink {
    fn push(&mut self, from: &NodeId, to: &NodeId, reason: EdgeReason) {
        let edge = Edge::new(from.clone(), to.clone(), reason);
        if self.dedup.admit(&edge) {
            self.edges.push(edge);
        }
    }
}

fn namespace_of(node: &Node) -> &str {
    node.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
}

fn kind_of(attrs: &KubernetesAttributes) -> String {
    attrs.kind.to_lowercase()
}

/// Deserialize a typed view of part of a manifest, falling back to an empty view.
fn view<T: for<'de> Deserialize<'de> + Default>(value: Option<&Value>, what: &str) -> T {
    match value {
        None | Some(Value::Null) => T::default(),
        Some(v) => T::deserialize(v).unwrap_or_else(|e| {
            debug!("Ignoring malformed {what}: {e}");
            T::default()
        }),
    }
}

// `null` where a list or map is expected reads as empty
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---- selector matching ----

#[derive(Debug, Default, Deserialize)]
struct ServiceSpec {
    #[serde(default, deserialize_with = "string_map")]
    selector: BTreeMap<String, String>,
}

fn match_selectors(
    k8s: &[(&Node, &KubernetesAttributes)],
    sink: &mut EdgeSink,
    diagnostics: &mut Diagnostics,
) {
    let workloads: Vec<(&Node, BTreeMap<String, String>)> = k8s
        .iter()
        .filter(|(_, a)| SELECTABLE_KINDS.contains(&kind_of(a).as_str()))
        .map(|(n, a)| {
            let template = a.spec.pointer("/template/metadata/labels").map(scalar_map).unwrap_or_default();
            (*n, template)
        })
        .collect();

    for (service, attrs) in k8s.iter().filter(|(_, a)| kind_of(a) == "service") {
        let spec: ServiceSpec = view(Some(&attrs.spec), "service spec");
        if spec.selector.is_empty() {
            continue;
        }
        let ns = namespace_of(service);
        let mut matched = false;
        for (workload, template_labels) in &workloads {
            if namespace_of(workload) != ns {
                continue;
            }
            let NodePayload::Kubernetes(w) = &workload.attributes else { continue };
            if is_subset(&spec.selector, &w.metadata.labels) || is_subset(&spec.selector, template_labels) {
                sink.push(&service.id, &workload.id, EdgeReason::SelectorMatch);
                matched = true;
            }
        }
        if !matched {
            debug!("{}: selector matches no workload", service.id);
            diagnostics.unresolved_selectors += 1;
        }
    }
}

fn is_subset(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

// ---- ingress backends ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngressSpec {
    #[serde(default, deserialize_with = "nullable")]
    rules: Vec<IngressRule>,
    #[serde(default)]
    default_backend: Option<IngressBackend>,
    // extensions/v1beta1 spelling of the default backend
    #[serde(default)]
    backend: Option<IngressBackend>,
}

#[derive(Debug, Default, Deserialize)]
struct IngressRule {
    #[serde(default)]
    http: Option<HttpIngressRule>,
}

#[derive(Debug, Default, Deserialize)]
struct HttpIngressRule {
    #[serde(default, deserialize_with = "nullable")]
    paths: Vec<HttpIngressPath>,
}

#[derive(Debug, Default, Deserialize)]
struct HttpIngressPath {
    #[serde(default)]
    backend: Option<IngressBackend>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngressBackend {
    #[serde(default)]
    service: Option<ServiceBackend>,
    #[serde(default)]
    service_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceBackend {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
}

impl IngressBackend {
    /// `(namespace, name)` of the target service.
    fn target<'a>(&'a self, ingress_ns: &'a str) -> Option<(&'a str, &'a str)> {
        match &self.service {
            Some(svc) => {
                let name = svc.name.as_deref()?;
                Some((svc.namespace.as_deref().unwrap_or(ingress_ns), name))
            }
            None => self.service_name.as_deref().map(|name| (ingress_ns, name)),
        }
    }
}

fn resolve_ingress_backends(
    k8s: &[(&Node, &KubernetesAttributes)],
    index: &ObjectIndex<'_>,
    sink: &mut EdgeSink,
    diagnostics: &mut Diagnostics,
) {
    for (ingress, attrs) in k8s.iter().filter(|(_, a)| kind_of(a) == "ingress") {
        let spec: IngressSpec = view(Some(&attrs.spec), "ingress spec");
        let ns = namespace_of(ingress);
        let backends = spec
            .rules
            .iter()
            .filter_map(|r| r.http.as_ref())
            .flat_map(|http| http.paths.iter().filter_map(|p| p.backend.as_ref()))
            .chain(spec.default_backend.as_ref())
            .chain(spec.backend.as_ref());

        for backend in backends {
            let Some((svc_ns, svc_name)) = backend.target(ns) else { continue };
            match index.find("service", svc_ns, svc_name) {
                Some(service) => sink.push(&ingress.id, &service.id, EdgeReason::IngressBackend),
                None => {
                    debug!("{}: backend service {svc_ns}/{svc_name} not found", ingress.id);
                    diagnostics.unresolved_backends += 1;
                }
            }
        }
    }
}

// ---- config references ----

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(default, deserialize_with = "nullable")]
    containers: Vec<Container>,
    #[serde(default, deserialize_with = "nullable")]
    init_containers: Vec<Container>,
    #[serde(default, deserialize_with = "nullable")]
    volumes: Vec<Volume>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    #[serde(default, deserialize_with = "nullable")]
    env_from: Vec<EnvFromSource>,
    #[serde(default, deserialize_with = "nullable")]
    env: Vec<EnvVar>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvFromSource {
    #[serde(default)]
    config_map_ref: Option<NameRef>,
    #[serde(default)]
    secret_ref: Option<NameRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvVar {
    #[serde(default)]
    value_from: Option<EnvVarSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvVarSource {
    #[serde(default)]
    config_map_key_ref: Option<NameRef>,
    #[serde(default)]
    secret_key_ref: Option<NameRef>,
}

#[derive(Debug, Default, Deserialize)]
struct NameRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    #[serde(default)]
    config_map: Option<NameRef>,
    #[serde(default)]
    secret: Option<SecretVolume>,
    #[serde(default)]
    projected: Option<ProjectedVolume>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretVolume {
    #[serde(default)]
    secret_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProjectedVolume {
    #[serde(default, deserialize_with = "nullable")]
    sources: Vec<ProjectedSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectedSource {
    #[serde(default)]
    config_map: Option<NameRef>,
    #[serde(default)]
    secret: Option<NameRef>,
}

/// Location of the pod spec inside a workload's `spec`.
fn pod_spec_pointer(kind: &str) -> Option<&'static str> {
    match kind {
        "pod" => Some(""),
        "deployment" | "statefulset" | "daemonset" | "replicaset" | "job" => Some("/template/spec"),
        "cronjob" => Some("/jobTemplate/spec/template/spec"),
        _ => None,
    }
}

fn config_refs(pod: &PodSpec) -> Vec<(EdgeReason, &str)> {
    let mut out = Vec::new();
    for c in pod.containers.iter().chain(&pod.init_containers) {
        for ef in &c.env_from {
            if let Some(name) = ef.config_map_ref.as_ref().and_then(|r| r.name.as_deref()) {
                out.push((EdgeReason::EnvFromConfigMap, name));
            }
            if let Some(name) = ef.secret_ref.as_ref().and_then(|r| r.name.as_deref()) {
                out.push((EdgeReason::EnvFromSecret, name));
            }
        }
        for var in &c.env {
            let Some(src) = &var.value_from else { continue };
            if let Some(name) = src.config_map_key_ref.as_ref().and_then(|r| r.name.as_deref()) {
                out.push((EdgeReason::EnvConfigMap, name));
            }
            if let Some(name) = src.secret_key_ref.as_ref().and_then(|r| r.name.as_deref()) {
                out.push((EdgeReason::EnvSecret, name));
            }
        }
    }
    for v in &pod.volumes {
        if let Some(name) = v.config_map.as_ref().and_then(|r| r.name.as_deref()) {
            out.push((EdgeReason::VolumeConfigMap, name));
        }
        if let Some(name) = v.secret.as_ref().and_then(|s| s.secret_name.as_deref().or(s.name.as_deref())) {
            out.push((EdgeReason::VolumeSecret, name));
        }
        for src in v.projected.iter().flat_map(|p| &p.sources) {
            if let Some(name) = src.config_map.as_ref().and_then(|r| r.name.as_deref()) {
                out.push((EdgeReason::VolumeConfigMap, name));
            }
            if let Some(name) = src.secret.as_ref().and_then(|r| r.name.as_deref()) {
                out.push((EdgeReason::VolumeSecret, name));
            }
        }
    }
    out
}

fn target_kind(reason: EdgeReason) -> &'static str {
    match reason {
        EdgeReason::EnvFromSecret | EdgeReason::EnvSecret | EdgeReason::VolumeSecret => "secret",
        _ => "configmap",
    }
}

fn scan_config_references(
    k8s: &[(&Node, &KubernetesAttributes)],
    index: &ObjectIndex<'_>,
    sink: &mut EdgeSink,
    diagnostics: &mut Diagnostics,
) {
    for (workload, attrs) in k8s {
        let Some(pointer) = pod_spec_pointer(&kind_of(attrs)) else { continue };
        let pod: PodSpec = view(attrs.spec.pointer(pointer), "pod spec");
        let ns = namespace_of(workload);
        for (reason, name) in config_refs(&pod) {
            match index.find(target_kind(reason), ns, name) {
                Some(target) => sink.push(&workload.id, &target.id, reason),
                None => {
                    debug!("{}: {reason} target {ns}/{name} not found", workload.id);
                    diagnostics.unresolved_config_refs += 1;
                }
            }
        }
    }
}

/// Manifest files under `root` (or `root` itself when it is a file).
///
/// # Errors
/// Returns `ParseError::Io` if `root` does not exist.
pub fn manifest_inputs(root: &Path) -> Result<Vec<PathBuf>, ParseError> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    if !root.exists() {
        return Err(ParseError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", root.display()),
        )));
    }
    Ok(crate::utils::file_walker::manifest_files(root))
}
