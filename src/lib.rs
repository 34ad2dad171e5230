//! iac-graph — infrastructure-as-code resource dependency graphs
//!
//! Ingest Terraform plans, Kubernetes manifests and Helm charts into one
//! graph model of typed nodes and reason-tagged edges, inferring the
//! relationships the sources leave implicit.
//!
//! # Features
//! - Terraform: explicit `depends_on` plus references embedded in attribute
//!   values, resolved across module boundaries
//! - Kubernetes: service selectors, ingress backends, ConfigMap/Secret references
//! - Helm: renders a chart with `helm template`, then annotates it with chart
//!   provenance, metadata and dependency nodes
//! - Queries: summary, neighbors, dangling edges, cycles
//!
//! # Quickstart (Library)
//! ```no_run
//! use iac_graph::parser::terraform::TerraformParser;
//!
//! let graph = TerraformParser::new()
//!     .parse_plan_file(std::path::Path::new("plan.json"))
//!     .expect("parse plan");
//! println!("nodes: {} edges: {}", graph.nodes.len(), graph.edges.len());
//! ```
//!
//! # Quickstart (CLI)
//! ```text
//! iac-graph ingest plan.json --out graph.json
//! iac-graph ingest ./manifests --namespace prod
//! iac-graph ingest ./charts/shop --values values-prod.yaml --release shop
//! iac-graph query neighbors --graph graph.json --node k8s:service:default/web
//! ```
//!
//! # Logging
//! Diagnostics go to stderr through `tracing`. Set `IAC_GRAPH_LOG` (an
//! `EnvFilter` directive) or pass `-v`/`-vv` to see resolution misses.
pub mod app;
pub mod cli;
pub mod errors;
pub mod graph;
pub mod parser;
pub mod query;
pub mod utils;
