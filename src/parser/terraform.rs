//! Terraform plan (`terraform show -json`) to resource graph.
//!
//! Nodes are created from `resource_changes` first, filling an `AddressCache`;
//! a second pass then resolves explicit `depends_on` entries and the
//! references embedded in each resource's post-change attribute tree.
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use tracing::{debug, warn};

use crate::errors::{GraphError, ParseError};
use crate::graph::resolver::AddressCache;
use crate::graph::{
    Diagnostics, Edge, EdgeDedup, EdgeReason, Node, NodeId, NodePayload, ResourceGraph,
    TerraformAttributes,
};
use crate::parser::reference::{extract_references, ModuleQualification};

const FAMILY: &str = "terraform";

#[derive(Debug, Deserialize)]
struct ResourceChange {
    address: String,
    #[serde(default)]
    module_address: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(rename = "type", default)]
    resource_type: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    index: Option<Value>,
    #[serde(default)]
    provider_name: String,
    #[serde(default)]
    change: Change,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Change {
    #[serde(default)]
    actions: Vec<String>,
    #[serde(default)]
    before: Value,
    #[serde(default)]
    after: Value,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TerraformParser {
    qualification: ModuleQualification,
}

impl TerraformParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_qualification(qualification: ModuleQualification) -> Self {
        Self { qualification }
    }

    /// Parse a plan read from disk. `meta.source` records the path.
    ///
    /// # Errors
    /// `GraphError::Io` when the file cannot be read, `GraphError::Parse` when
    /// it is not valid JSON or not a plan.
    pub fn parse_plan_file(&self, path: &Path) -> Result<ResourceGraph, GraphError> {
        let data = std::fs::read_to_string(path)?;
        let mut graph = self
            .parse_plan_str(&data)
            .map_err(|source| GraphError::Parse { file: path.to_path_buf(), source })?;
        graph.set_meta("source", Value::String(path.display().to_string()));
        Ok(graph)
    }

    /// # Errors
    /// `ParseError::Json` for malformed JSON, otherwise as `parse_plan`.
    pub fn parse_plan_str(&self, data: &str) -> Result<ResourceGraph, ParseError> {
        let plan: Value = serde_json::from_str(data)?;
        self.parse_plan(&plan)
    }

    /// Build the graph for one plan document.
    ///
    /// # Errors
    /// `ParseError::InvalidInputFormat` when the plan is not an object or has
    /// no `resource_changes` array. Individual malformed entries are skipped.
    pub fn parse_plan(&self, plan: &Value) -> Result<ResourceGraph, ParseError> {
        let obj = plan
            .as_object()
            .ok_or_else(|| ParseError::invalid(FAMILY, "plan is not a JSON object"))?;
        let changes = obj
            .get("resource_changes")
            .ok_or_else(|| ParseError::invalid(FAMILY, "missing resource_changes"))?
            .as_array()
            .ok_or_else(|| ParseError::invalid(FAMILY, "resource_changes is not an array"))?;

        let mut graph = ResourceGraph::new(FAMILY);
        for key in ["format_version", "terraform_version"] {
            if let Some(v) = obj.get(key) {
                graph.set_meta(key, v.clone());
            }
        }

        let mut diagnostics = Diagnostics::default();
        let mut cache = AddressCache::with_capacity(changes.len());
        let mut seen: HashSet<NodeId> = HashSet::with_capacity(changes.len());

        for (i, raw) in changes.iter().enumerate() {
            let rc = match ResourceChange::deserialize(raw) {
                Ok(rc) if !rc.address.is_empty() => rc,
                Ok(_) => {
                    warn!("Skipping resource change #{i}: empty address");
                    diagnostics.skipped_documents += 1;
                    continue;
                }
                Err(e) => {
                    warn!("Skipping resource change #{i}: {e}");
                    diagnostics.skipped_documents += 1;
                    continue;
                }
            };
            let node = resource_node(rc);
            if !seen.insert(node.id.clone()) {
                warn!("Duplicate resource {}; keeping the first", node.id);
                diagnostics.duplicate_nodes += 1;
                continue;
            }
            register_spellings(&mut cache, &node);
            graph.add_node(node);
        }
        debug!("Terraform: {} nodes, {} address spellings", graph.nodes.len(), cache.len());

        self.infer_references(&mut graph, &cache, &mut diagnostics);
        graph.record_diagnostics(&diagnostics);
        Ok(graph)
    }

    /// Resolve `depends_on` entries and attribute references of every
    /// Terraform node against `cache`, appending only edges not already present.
    pub fn infer_references(
        &self,
        graph: &mut ResourceGraph,
        cache: &AddressCache,
        diagnostics: &mut Diagnostics,
    ) {
        let mut dedup = EdgeDedup::seeded(&graph.edges);
        let mut produced: Vec<Edge> = Vec::new();

        for node in &graph.nodes {
            let NodePayload::Terraform(attrs) = &node.attributes else { continue };
            let from_module = node.namespace.as_deref();

            for dep in &attrs.depends_on {
                match cache.resolve(dep, from_module) {
                    Some(to) if to != &node.id => {
                        let e = Edge::new(node.id.clone(), to.clone(), EdgeReason::DependsOn);
                        if dedup.admit(&e) {
                            produced.push(e);
                        }
                    }
                    Some(_) => {}
                    None => {
                        debug!("{}: unresolved depends_on {dep}", node.id);
                        diagnostics.unresolved_references += 1;
                    }
                }
            }

            let mut leaves: Vec<&str> = Vec::new();
            collect_strings(&attrs.after, &mut leaves);
            for leaf in leaves {
                let targets: BTreeSet<String> = extract_references(leaf, self.qualification);
                for target in targets {
                    match cache.resolve(&target, from_module) {
                        Some(to) if to != &node.id => {
                            let e = Edge::new(
                                node.id.clone(),
                                to.clone(),
                                EdgeReason::AttributeReference,
                            );
                            if dedup.admit(&e) {
                                produced.push(e);
                            }
                        }
                        Some(_) => {}
                        None => {
                            debug!("{}: unresolved reference {target}", node.id);
                            diagnostics.unresolved_references += 1;
                        }
                    }
                }
            }
        }

        debug!("Terraform: {} reference edges", produced.len());
        for e in produced {
            graph.add_edge(e);
        }
    }

    /// Rebuild the address cache from the Terraform nodes of an existing graph.
    #[must_use]
    pub fn address_cache(graph: &ResourceGraph) -> AddressCache {
        let mut cache = AddressCache::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            if matches!(node.attributes, NodePayload::Terraform(_)) {
                register_spellings(&mut cache, node);
            }
        }
        cache
    }
}

fn resource_node(rc: ResourceChange) -> Node {
    let module_path = rc
        .module_address
        .filter(|m| !m.is_empty())
        .or_else(|| split_module_prefix(&rc.address).0.map(str::to_string));
    let id = NodeId(format!("tf:{}:{}", rc.resource_type, rc.address));
    Node {
        id,
        node_type: format!("tf.{}", rc.resource_type),
        name: rc.name,
        namespace: module_path.clone(),
        attributes: NodePayload::Terraform(TerraformAttributes {
            mode: rc.mode.unwrap_or_else(|| "managed".to_string()),
            provider: rc.provider_name,
            module_address: module_path,
            index: rc.index,
            actions: rc.change.actions,
            before: rc.change.before,
            after: rc.change.after,
            depends_on: rc.depends_on,
        }),
    }
}

// Node ids embed the full plan address after the `tf:<type>:` prefix.
fn plan_address(node: &Node) -> &str {
    let id = node.id.as_str();
    id.strip_prefix("tf:")
        .and_then(|rest| rest.split_once(':'))
        .map_or(id, |(_, addr)| addr)
}

fn register_spellings(cache: &mut AddressCache, node: &Node) {
    let address = plan_address(node);
    let module = node.namespace.as_deref();
    let bare = match module {
        Some(m) => address.strip_prefix(m).and_then(|r| r.strip_prefix('.')).unwrap_or(address),
        None => address,
    };
    cache.register(bare, module, &node.id);

    // `aws_instance.web[0]` is referenced as `aws_instance.web`; first instance wins
    if let Some(base) = strip_index(bare) {
        cache.register_alias(base, &node.id);
        if let Some(m) = module {
            cache.register_alias(&format!("{m}.{base}"), &node.id);
        }
    }
}

fn strip_index(address: &str) -> Option<&str> {
    if !address.ends_with(']') {
        return None;
    }
    address.rfind('[').map(|i| &address[..i])
}

/// Split `module.a.module.b["k"].aws_x.y` into (`module.a.module.b["k"]`, `aws_x.y`).
///
/// Dots inside brackets do not separate segments.
#[must_use]
pub fn split_module_prefix(address: &str) -> (Option<&str>, &str) {
    let mut end = 0usize;
    let mut rest = address;
    while let Some(after) = rest.strip_prefix("module.") {
        let Some(name_len) = segment_len(after) else { break };
        let consumed = "module.".len() + name_len;
        // Needs a following `.` and something after it
        if rest.as_bytes().get(consumed) != Some(&b'.') {
            break;
        }
        end += consumed + 1;
        rest = &rest[consumed + 1..];
    }
    if end == 0 {
        (None, address)
    } else {
        (Some(&address[..end - 1]), &address[end..])
    }
}

// Length of one address segment, treating `[...]` (and quotes inside) as opaque.
fn segment_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    let mut in_str = false;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'"' => in_str = !in_str,
            b'[' if !in_str => depth += 1,
            b']' if !in_str => depth = depth.saturating_sub(1),
            b'.' if !in_str && depth == 0 => return (i > 0).then_some(i),
            _ => {}
        }
    }
    None
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => {
            for v in items {
                collect_strings(v, out);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect_strings(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rc(address: &str, ty: &str, name: &str, after: Value) -> Value {
        json!({"address": address, "type": ty, "name": name, "change": {"actions": ["create"], "after": after}})
    }

    #[test]
    fn subnet_references_vpc() {
        let plan = json!({
            "format_version": "1.2",
            "resource_changes": [
                rc("aws_vpc.main", "aws_vpc", "main", json!({"cidr_block": "10.0.0.0/16"})),
                rc("aws_subnet.public", "aws_subnet", "public", json!({"vpc_id": "${aws_vpc.main.id}"})),
            ]
        });
        let g = TerraformParser::new().parse_plan(&plan).unwrap();
        assert_eq!(g.nodes.len(), 2);
        assert_eq!(g.edges.len(), 1);
        let e = &g.edges[0];
        assert_eq!(e.from_id.as_str(), "tf:aws_subnet:aws_subnet.public");
        assert_eq!(e.to_id.as_str(), "tf:aws_vpc:aws_vpc.main");
        assert_eq!(e.reason, EdgeReason::AttributeReference);
        assert_eq!(g.meta["format_version"], "1.2");
        assert_eq!(g.meta["parser"], "terraform");
    }

    #[test]
    fn missing_resource_changes_is_rejected() {
        let err = TerraformParser::new().parse_plan(&json!({"planned_values": {}})).unwrap_err();
        assert!(matches!(err, ParseError::InvalidInputFormat { family: "terraform", .. }));
        let err = TerraformParser::new().parse_plan(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, ParseError::InvalidInputFormat { .. }));
        let err = TerraformParser::new().parse_plan(&json!({"resource_changes": {}})).unwrap_err();
        assert!(matches!(err, ParseError::InvalidInputFormat { .. }));
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let plan = json!({"resource_changes": [
            "not-an-object",
            {"type": "aws_vpc"},
            rc("aws_vpc.main", "aws_vpc", "main", json!({})),
        ]});
        let g = TerraformParser::new().parse_plan(&plan).unwrap();
        assert_eq!(g.nodes.len(), 1);
        assert_eq!(g.meta["diagnostics"]["skipped_documents"], 2);
    }

    #[test]
    fn depends_on_edges_resolve_or_vanish() {
        let mut sg = rc("aws_security_group.web", "aws_security_group", "web", json!({}));
        sg["depends_on"] = json!(["aws_vpc.main", "aws_nat_gateway.gone"]);
        let plan = json!({"resource_changes": [rc("aws_vpc.main", "aws_vpc", "main", json!({})), sg]});
        let g = TerraformParser::new().parse_plan(&plan).unwrap();
        let deps: Vec<_> = g.edges_with_reason(EdgeReason::DependsOn).collect();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].to_id.as_str(), "tf:aws_vpc:aws_vpc.main");
        assert_eq!(g.meta["diagnostics"]["unresolved_references"], 1);
        assert!(g.validate().is_empty());
    }

    #[test]
    fn module_scoped_reference_is_qualified() {
        let mut subnet = rc("module.network.aws_subnet.public", "aws_subnet", "public", json!({}));
        subnet["module_address"] = json!("module.network");
        let mut route = rc(
            "module.network.aws_route_table_association.a",
            "aws_route_table_association",
            "a",
            json!({"subnet_id": "${aws_subnet.public.id}"}),
        );
        route["module_address"] = json!("module.network");
        // A root resource with the same bare address must not capture the module reference
        let root_subnet = rc("aws_subnet.public", "aws_subnet", "public", json!({}));
        let root_route = rc(
            "aws_route_table_association.a",
            "aws_route_table_association",
            "a",
            json!({"subnet_id": "${aws_subnet.public.id}"}),
        );
        let plan = json!({"resource_changes": [root_subnet, subnet, route, root_route]});
        let g = TerraformParser::new().parse_plan(&plan).unwrap();
        assert_eq!(g.edges.len(), 2);
        let target_of = |from: &str| {
            g.edges.iter().find(|e| e.from_id.as_str() == from).map(|e| e.to_id.as_str().to_string())
        };
        assert_eq!(
            target_of("tf:aws_route_table_association:module.network.aws_route_table_association.a")
                .as_deref(),
            Some("tf:aws_subnet:module.network.aws_subnet.public")
        );
        assert_eq!(
            target_of("tf:aws_route_table_association:aws_route_table_association.a").as_deref(),
            Some("tf:aws_subnet:aws_subnet.public")
        );
    }

    #[test]
    fn sibling_modules_resolve_to_their_own_resources() {
        let mut changes = Vec::new();
        for m in ["module.a", "module.b"] {
            let mut subnet = rc(&format!("{m}.aws_subnet.public"), "aws_subnet", "public", json!({}));
            subnet["module_address"] = json!(m);
            changes.push(subnet);
        }
        let mut assoc = rc(
            "module.b.aws_route_table_association.x",
            "aws_route_table_association",
            "x",
            json!({"subnet_id": "${aws_subnet.public.id}"}),
        );
        assoc["module_address"] = json!("module.b");
        changes.push(assoc);

        let g = TerraformParser::new().parse_plan(&json!({"resource_changes": changes})).unwrap();
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].to_id.as_str(), "tf:aws_subnet:module.b.aws_subnet.public");
    }

    #[test]
    fn module_path_derived_from_address_when_missing() {
        let plan = json!({"resource_changes": [
            rc("module.a.module.b.aws_s3_bucket.logs", "aws_s3_bucket", "logs", json!({})),
            rc("module.a.module.b.aws_s3_bucket_policy.p", "aws_s3_bucket_policy", "p",
               json!({"bucket": "${aws_s3_bucket.logs.id}"})),
            rc("aws_cloudtrail.main", "aws_cloudtrail", "main",
               json!({"s3_bucket_name": "${module.a.module.b.aws_s3_bucket.logs.id}"})),
        ]});
        let g = TerraformParser::new().parse_plan(&plan).unwrap();
        assert_eq!(g.nodes[0].namespace.as_deref(), Some("module.a.module.b"));
        assert_eq!(g.edges.len(), 2);
        assert!(g.validate().is_empty());

        // One-level cleaning cannot reach the nested bucket from the root
        let single = TerraformParser::with_qualification(ModuleQualification::Single);
        let g = single.parse_plan(&plan).unwrap();
        assert_eq!(g.edges.len(), 1);
    }

    #[test]
    fn indexed_instances_answer_to_base_address() {
        let mut web0 = rc("aws_instance.web[0]", "aws_instance", "web", json!({}));
        web0["index"] = json!(0);
        let mut web1 = rc("aws_instance.web[1]", "aws_instance", "web", json!({}));
        web1["index"] = json!(1);
        let lb = rc("aws_lb_target_group_attachment.a", "aws_lb_target_group_attachment", "a",
                    json!({"target_id": "${aws_instance.web[0].id}"}));
        let g = TerraformParser::new().parse_plan(&json!({"resource_changes": [web0, web1, lb]})).unwrap();
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].to_id.as_str(), "tf:aws_instance:aws_instance.web[0]");
    }

    #[test]
    fn duplicates_and_self_references_produce_nothing() {
        let plan = json!({"resource_changes": [
            rc("aws_vpc.main", "aws_vpc", "main", json!({"tags": {"self": "aws_vpc.main.id"}})),
            rc("aws_vpc.main", "aws_vpc", "main", json!({})),
        ]});
        let g = TerraformParser::new().parse_plan(&plan).unwrap();
        assert_eq!(g.nodes.len(), 1);
        assert!(g.edges.is_empty());
        assert_eq!(g.meta["diagnostics"]["duplicate_nodes"], 1);
    }

    #[test]
    fn rerunning_inference_adds_no_edges() {
        let plan = json!({"resource_changes": [
            rc("aws_vpc.main", "aws_vpc", "main", json!({})),
            rc("aws_subnet.a", "aws_subnet", "a", json!({"vpc_id": "${aws_vpc.main.id}", "x": ["aws_vpc.main.arn"]})),
        ]});
        let parser = TerraformParser::new();
        let mut g = parser.parse_plan(&plan).unwrap();
        let before = g.edges.clone();
        let cache = TerraformParser::address_cache(&g);
        parser.infer_references(&mut g, &cache, &mut Diagnostics::default());
        assert_eq!(g.edges, before);
    }

    #[test]
    fn split_module_prefix_handles_keys_with_dots() {
        assert_eq!(split_module_prefix("aws_vpc.main"), (None, "aws_vpc.main"));
        assert_eq!(
            split_module_prefix("module.net.aws_vpc.main"),
            (Some("module.net"), "aws_vpc.main")
        );
        assert_eq!(
            split_module_prefix(r#"module.svc["a.b"].module.db[0].aws_db_instance.this"#),
            (Some(r#"module.svc["a.b"].module.db[0]"#), "aws_db_instance.this")
        );
    }
}
