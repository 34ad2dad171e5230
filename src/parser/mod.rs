//! Input parsers, one per IaC family, and the `ingest` entry point that
//! picks one for a path.
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::GraphError;
use crate::graph::ResourceGraph;

pub mod helm;
pub mod kubernetes;
pub mod reference;
pub mod terraform;

use helm::{ChartRequest, HelmParser};
use kubernetes::KubernetesParser;
use reference::ModuleQualification;
use terraform::TerraformParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Terraform,
    Kubernetes,
    Helm,
}

impl Family {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terraform => "terraform",
            Self::Kubernetes => "kubernetes",
            Self::Helm => "helm",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infer the family of `path` from its extension or, for directories, its contents.
///
/// `.json` is a Terraform plan, `.yaml`/`.yml` a Kubernetes manifest, a chart
/// archive or a directory with `Chart.yaml` a Helm chart, and any other
/// directory a tree of Kubernetes manifests.
#[must_use]
pub fn detect_family(path: &Path) -> Option<Family> {
    if path.is_dir() {
        return Some(if helm::is_chart_dir(path) { Family::Helm } else { Family::Kubernetes });
    }
    if helm::is_chart_archive(path) {
        return Some(Family::Helm);
    }
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("json") => Some(Family::Terraform),
        Some("yaml" | "yml") => Some(Family::Kubernetes),
        _ => None,
    }
}

/// Knobs for `ingest`. Fields left `None` fall back to per-family defaults.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub family: Option<Family>,
    pub values_files: Vec<PathBuf>,
    pub namespace: Option<String>,
    pub release_name: Option<String>,
    pub helm_binary: Option<String>,
    pub module_qualification: ModuleQualification,
}

/// Build the resource graph for one input path.
///
/// # Errors
/// `GraphError::UnsupportedInput` when the family cannot be determined,
/// `GraphError::Parse`/`Io` when a Terraform plan is rejected or unreadable,
/// or a Kubernetes input path does not exist.
pub fn ingest(path: &Path, opts: &IngestOptions) -> Result<ResourceGraph, GraphError> {
    let family = opts
        .family
        .or_else(|| detect_family(path))
        .ok_or_else(|| GraphError::UnsupportedInput(path.display().to_string()))?;
    info!("Ingesting {} as {family}", path.display());

    match family {
        Family::Terraform => {
            TerraformParser::with_qualification(opts.module_qualification).parse_plan_file(path)
        }
        Family::Kubernetes => {
            let files = kubernetes::manifest_inputs(path)
                .map_err(|source| GraphError::Parse { file: path.to_path_buf(), source })?;
            let parser = match &opts.namespace {
                Some(ns) => KubernetesParser::with_default_namespace(ns.clone()),
                None => KubernetesParser::new(),
            };
            Ok(parser.parse_files(&files))
        }
        Family::Helm => {
            let mut request = ChartRequest::new(path).with_values(opts.values_files.clone());
            if let Some(ns) = &opts.namespace {
                request = request.with_namespace(ns.clone());
            }
            if let Some(release) = &opts.release_name {
                request = request.with_release_name(release.clone());
            }
            let binary = opts.helm_binary.as_deref().unwrap_or(helm::DEFAULT_BINARY);
            Ok(HelmParser::with_binary(binary).parse_chart(&request))
        }
    }
}
