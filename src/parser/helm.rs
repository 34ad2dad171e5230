//! Helm chart composition.
//!
//! A chart is rendered by an external `ManifestRenderer`, the resulting text is
//! handed to the Kubernetes parser, and chart metadata from a
//! `ChartDescriptorSource` is attached to the graph. Neither collaborator can
//! fail the parse: their errors are logged and recorded in `meta`.
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::errors::{DescriptorError, RenderError};
use crate::graph::{
    DependencyAttributes, Diagnostics, HelmProvenance, Node, NodeId, NodePayload, ResourceGraph,
};
use crate::parser::kubernetes::KubernetesParser;

const FAMILY: &str = "helm";
pub const DEFAULT_RELEASE_NAME: &str = "test-release";
pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_BINARY: &str = "helm";

/// What to render: chart location plus the `helm template` inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRequest {
    pub chart: PathBuf,
    /// Applied in order, later files override earlier ones.
    pub values_files: Vec<PathBuf>,
    pub namespace: String,
    pub release_name: String,
}

impl ChartRequest {
    #[must_use]
    pub fn new(chart: impl Into<PathBuf>) -> Self {
        Self {
            chart: chart.into(),
            values_files: Vec::new(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            release_name: DEFAULT_RELEASE_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn with_values(mut self, values_files: Vec<PathBuf>) -> Self {
        self.values_files = values_files;
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_release_name(mut self, release_name: impl Into<String>) -> Self {
        self.release_name = release_name.into();
        self
    }
}

/// Produces concatenated multi-document manifest text for a chart.
pub trait ManifestRenderer {
    /// # Errors
    /// Any `RenderError`; callers treat every variant as "no manifests".
    fn render(&self, request: &ChartRequest) -> Result<String, RenderError>;
}

impl<F> ManifestRenderer for F
where
    F: Fn(&ChartRequest) -> Result<String, RenderError>,
{
    fn render(&self, request: &ChartRequest) -> Result<String, RenderError> {
        self(request)
    }
}

/// Reads a chart's `Chart.yaml`.
pub trait ChartDescriptorSource {
    /// # Errors
    /// Any `DescriptorError`; callers treat every variant as "no metadata".
    fn read_descriptor(&self, chart: &Path) -> Result<ChartDescriptor, DescriptorError>;
}

impl<F> ChartDescriptorSource for F
where
    F: Fn(&Path) -> Result<ChartDescriptor, DescriptorError>,
{
    fn read_descriptor(&self, chart: &Path) -> Result<ChartDescriptor, DescriptorError> {
        self(chart)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDescriptor {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub dependencies: Vec<ChartDependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDependency {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub repository: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ChartDescriptor {
    /// # Errors
    /// Returns `DescriptorError::Yaml` when the text is not a YAML mapping of the expected shape.
    pub fn from_yaml(text: &str) -> Result<Self, DescriptorError> {
        Ok(serde_yaml::from_str(text)?)
    }

    fn to_meta(&self) -> Value {
        json!({
            "name": self.name,
            "version": self.version,
            "description": self.description,
            "dependencies": self.dependencies,
        })
    }
}

// Non-string scalars are kept as their YAML reading: an unquoted `version: 1.10`
// is a float and comes back as "1.1". Only quoted versions survive verbatim.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// True for `.tgz` / `.tar.gz` chart archives.
#[must_use]
pub fn is_chart_archive(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// True for a directory holding a `Chart.yaml` (or `Chart.yml`).
#[must_use]
pub fn is_chart_dir(path: &Path) -> bool {
    path.is_dir() && (path.join("Chart.yaml").is_file() || path.join("Chart.yml").is_file())
}

/// The `helm` command line tool.
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: String,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self { binary: DEFAULT_BINARY.to_string() }
    }
}

impl HelmCli {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Whether `helm version --short` runs successfully.
    #[must_use]
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .args(["version", "--short"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Arguments passed to the binary for `request`. Missing values files are left out.
    #[must_use]
    pub fn template_args(&self, request: &ChartRequest) -> Vec<String> {
        let mut args = vec![
            "template".to_string(),
            request.release_name.clone(),
            request.chart.display().to_string(),
            "--namespace".to_string(),
            request.namespace.clone(),
        ];
        for values in &request.values_files {
            if values.is_file() {
                args.push("-f".to_string());
                args.push(values.display().to_string());
            } else {
                warn!("Values file {} not found, skipping", values.display());
            }
        }
        args
    }

    /// `helm show chart <archive>`: the Chart.yaml packed in an archive.
    ///
    /// # Errors
    /// As `ManifestRenderer::render`.
    pub fn show_chart(&self, chart: &Path) -> Result<String, RenderError> {
        let args = vec!["show".to_string(), "chart".to_string(), chart.display().to_string()];
        self.run(&args)
    }

    fn run(&self, args: &[String]) -> Result<String, RenderError> {
        debug!("Running {} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary).args(args).output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::ToolNotFound(self.binary.clone())
            } else {
                RenderError::Io(e)
            }
        })?;
        if !output.status.success() {
            return Err(RenderError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(RenderError::EmptyOutput);
        }
        Ok(stdout)
    }
}

impl ManifestRenderer for HelmCli {
    fn render(&self, request: &ChartRequest) -> Result<String, RenderError> {
        self.run(&self.template_args(request))
    }
}

/// Reads `Chart.yaml` from a chart directory; archives go through `helm show chart`.
#[derive(Debug, Clone, Default)]
pub struct ChartDirectoryReader {
    cli: HelmCli,
}

impl ChartDirectoryReader {
    #[must_use]
    pub fn new(cli: HelmCli) -> Self {
        Self { cli }
    }
}

impl ChartDescriptorSource for ChartDirectoryReader {
    fn read_descriptor(&self, chart: &Path) -> Result<ChartDescriptor, DescriptorError> {
        if is_chart_archive(chart) && chart.is_file() {
            let text = self.cli.show_chart(chart)?;
            return ChartDescriptor::from_yaml(&text);
        }
        let file = ["Chart.yaml", "Chart.yml"]
            .iter()
            .map(|f| chart.join(f))
            .find(|p| p.is_file())
            .ok_or_else(|| DescriptorError::NotFound(chart.join("Chart.yaml")))?;
        let text = std::fs::read_to_string(&file)?;
        ChartDescriptor::from_yaml(&text)
    }
}

/// Builds the graph for one chart from a renderer and a descriptor source.
#[derive(Debug, Clone, Default)]
pub struct HelmParser<R, D> {
    renderer: R,
    descriptors: D,
}

impl HelmParser<HelmCli, ChartDirectoryReader> {
    /// Parser backed by the given `helm` executable.
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        let cli = HelmCli::new(binary);
        Self { renderer: cli.clone(), descriptors: ChartDirectoryReader::new(cli) }
    }
}

impl<R: ManifestRenderer, D: ChartDescriptorSource> HelmParser<R, D> {
    #[must_use]
    pub fn new(renderer: R, descriptors: D) -> Self {
        Self { renderer, descriptors }
    }

    /// Render, parse and annotate one chart. Always returns a graph.
    #[must_use]
    pub fn parse_chart(&self, request: &ChartRequest) -> ResourceGraph {
        let chart_path = request.chart.display().to_string();
        info!("Parsing chart {chart_path} as release {} in {}", request.release_name, request.namespace);

        let mut graph = ResourceGraph::new(FAMILY);
        graph.set_meta("chart_path", Value::String(chart_path.clone()));
        graph.set_meta(
            "values_files",
            Value::Array(request.values_files.iter().map(|p| Value::String(p.display().to_string())).collect()),
        );
        graph.set_meta("namespace", Value::String(request.namespace.clone()));
        graph.set_meta("release_name", Value::String(request.release_name.clone()));

        let mut diagnostics = Diagnostics::default();
        match self.renderer.render(request) {
            Ok(text) => {
                let rendered = KubernetesParser::with_default_namespace(request.namespace.clone())
                    .parse_str(&text, None);
                self.merge_rendered(&mut graph, rendered, request, &mut diagnostics);
            }
            Err(e) => {
                warn!("No manifests rendered from {chart_path}: {e}");
                graph.set_meta("render_error", Value::String(e.to_string()));
            }
        }

        match self.descriptors.read_descriptor(&request.chart) {
            Ok(descriptor) => {
                graph.set_meta("chart_metadata", descriptor.to_meta());
                add_dependency_nodes(&mut graph, &descriptor, &mut diagnostics);
            }
            Err(e) => {
                warn!("Chart metadata unavailable for {chart_path}: {e}");
                graph.set_meta("descriptor_error", Value::String(e.to_string()));
            }
        }

        graph.record_diagnostics(&diagnostics);
        debug!("Helm: {} nodes, {} edges", graph.nodes.len(), graph.edges.len());
        graph
    }

    fn merge_rendered(
        &self,
        graph: &mut ResourceGraph,
        rendered: ResourceGraph,
        request: &ChartRequest,
        diagnostics: &mut Diagnostics,
    ) {
        let ResourceGraph { nodes, edges, meta } = rendered;
        if let Some(d) = meta.get("diagnostics").cloned().and_then(|v| serde_json::from_value::<Diagnostics>(v).ok()) {
            diagnostics.absorb(&d);
        }
        if let Some(errors) = meta.get("errors") {
            graph.set_meta("errors", errors.clone());
        }
        let provenance = HelmProvenance {
            chart: request.chart.display().to_string(),
            release: request.release_name.clone(),
            source: FAMILY.to_string(),
        };
        for mut node in nodes {
            if let NodePayload::Kubernetes(attrs) = &mut node.attributes {
                attrs.helm = Some(provenance.clone());
            }
            graph.add_node(node);
        }
        for edge in edges {
            graph.add_edge(edge);
        }
    }
}

fn add_dependency_nodes(graph: &mut ResourceGraph, descriptor: &ChartDescriptor, diagnostics: &mut Diagnostics) {
    let mut seen: HashSet<String> = HashSet::new();
    for dep in &descriptor.dependencies {
        let name = if dep.name.is_empty() { "unknown" } else { dep.name.as_str() };
        if !seen.insert(name.to_string()) {
            warn!("Duplicate chart dependency {name}; keeping the first");
            diagnostics.duplicate_nodes += 1;
            continue;
        }
        graph.add_node(Node {
            id: NodeId(format!("helm:dependency:{name}")),
            node_type: "helm.dependency".to_string(),
            name: name.to_string(),
            namespace: None,
            attributes: NodePayload::HelmDependency(DependencyAttributes {
                version: dep.version.clone(),
                repository: dep.repository.clone(),
                condition: dep.condition.clone(),
                chart: descriptor.name.clone(),
            }),
        });
    }
}
