use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::parser::Family;
use crate::query::Direction;

pub mod logging;

#[derive(Debug, Parser)]
#[command(
    name = "iac-graph",
    version,
    about = "Infrastructure-as-code resource dependency graphs",
    long_about = "Ingest Terraform plans (terraform show -json), Kubernetes manifests or Helm charts into a resource dependency graph, and query saved graphs. Relationships the sources do not state explicitly (attribute references, selectors, ingress backends, config references) are inferred. Set IAC_GRAPH_LOG to an EnvFilter directive to control logging."
)]
pub struct Cli {
    /// Suppress completion messages
    #[arg(short, long, global = true, default_value_t = false)]
    pub quiet: bool,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FamilyArg {
    Terraform,
    Kubernetes,
    Helm,
}

impl From<FamilyArg> for Family {
    fn from(f: FamilyArg) -> Self {
        match f {
            FamilyArg::Terraform => Family::Terraform,
            FamilyArg::Kubernetes => Family::Kubernetes,
            FamilyArg::Helm => Family::Helm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DirectionArg {
    Out,
    In,
    #[default]
    Both,
}

impl From<DirectionArg> for Direction {
    fn from(d: DirectionArg) -> Self {
        match d {
            DirectionArg::Out => Direction::Outgoing,
            DirectionArg::In => Direction::Incoming,
            DirectionArg::Both => Direction::Both,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build the resource graph for a plan, manifest file/directory or chart
    Ingest {
        /// Input path: plan JSON, YAML manifest, manifest directory, chart directory or chart archive
        path: PathBuf,
        /// Input family; detected from the path when omitted
        #[arg(long = "type", value_enum)]
        family: Option<FamilyArg>,
        /// Write the graph JSON here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Helm values file (repeatable, applied in order)
        #[arg(long = "values", value_name = "FILE")]
        values: Vec<PathBuf>,
        /// Default namespace (Kubernetes) or release namespace (Helm)
        #[arg(long)]
        namespace: Option<String>,
        /// Helm release name
        #[arg(long = "release")]
        release: Option<String>,
        /// Path to a TOML configuration file (default: iac-graph.toml next to the input)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write compact JSON
        #[arg(long, default_value_t = false)]
        compact: bool,
    },
    /// Run queries over a saved graph
    Query {
        #[command(subcommand)]
        query: QueryCommands,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueryCommands {
    /// Node counts per type and edge counts per reason
    Summary {
        /// Graph JSON produced by `ingest`
        #[arg(long)]
        graph: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Edges adjacent to a node
    Neighbors {
        #[arg(long)]
        graph: PathBuf,
        /// Node id, e.g. k8s:service:default/web
        #[arg(long)]
        node: String,
        #[arg(long, value_enum, default_value_t = DirectionArg::Both)]
        direction: DirectionArg,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Edges whose endpoints are missing from the graph
    Dangling {
        #[arg(long)]
        graph: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Dependency cycles
    Cycles {
        #[arg(long)]
        graph: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
