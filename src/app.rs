use crate::cli::{logging, Cli, Commands, OutputFormat, QueryCommands};
use crate::errors::GraphError;
use crate::graph::ResourceGraph;
use crate::parser::{detect_family, ingest, Family, IngestOptions};
use crate::query::{CyclesQuery, DanglingEdgesQuery, NeighborsQuery, Query, SummaryQuery};
use crate::utils::config::{load_config_at, load_config_near, Config};
use crate::utils::table;
use clap::CommandFactory;
use clap_complete::generate;
use serde::Serialize;
use std::io;
use std::path::Path;

/// Graph built and written.
pub const EXIT_OK: i32 = 0;
/// Parse failure, unreadable input or output error.
pub const EXIT_FAILURE: i32 = 1;
/// The input type could not be determined.
pub const EXIT_UNSUPPORTED: i32 = 2;

/// Run the CLI logic in-process.
///
/// Returns an exit code (0 = success).
#[must_use]
pub fn run_cli(cli: Cli) -> i32 {
    let Cli { quiet, verbose, command } = cli;
    match command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let mut out = io::stdout();
            generate(shell, &mut cmd, "iac-graph", &mut out);
            EXIT_OK
        }
        Commands::Ingest { path, family, out, values, namespace, release, config, compact } => {
            let cfg = resolve_config(config.as_deref(), &path);
            logging::init_logging(verbose, cfg.log_level());

            let family = family.map(Family::from).or_else(|| detect_family(&path));
            let helm = cfg.helm.clone().unwrap_or_default();
            // `[helm] namespace` is the release namespace, not a manifest default
            let configured_namespace = if family == Some(Family::Helm) { helm.namespace } else { None };
            let opts = IngestOptions {
                family,
                values_files: if values.is_empty() { helm.values.unwrap_or_default() } else { values },
                namespace: namespace.or(configured_namespace),
                release_name: release.or(helm.release_name),
                helm_binary: helm.binary,
                module_qualification: cfg.module_qualification().unwrap_or_default(),
            };
            let pretty = !compact && cfg.pretty().unwrap_or(true);
            run_ingest(&path, &opts, out.as_deref(), pretty, quiet)
        }
        Commands::Query { query } => {
            logging::init_logging(verbose, None);
            run_query(query)
        }
    }
}

fn resolve_config(explicit: Option<&Path>, input: &Path) -> Config {
    match explicit {
        Some(p) => load_config_at(p).unwrap_or_else(|| {
            eprintln!("Failed to load config {}; using defaults", p.display());
            Config::default()
        }),
        None => load_config_near(input).unwrap_or_default(),
    }
}

fn run_ingest(path: &Path, opts: &IngestOptions, out: Option<&Path>, pretty: bool, quiet: bool) -> i32 {
    let graph = match ingest(path, opts) {
        Ok(g) => g,
        Err(e @ GraphError::UnsupportedInput(_)) => {
            eprintln!("{e}. Use --type terraform|kubernetes|helm.");
            return EXIT_UNSUPPORTED;
        }
        Err(e) => {
            eprintln!("Ingest failed: {e}");
            return EXIT_FAILURE;
        }
    };

    match out {
        Some(out_path) => {
            if let Err(e) = graph.save_json(out_path, pretty) {
                eprintln!("Failed to write graph {}: {e}", out_path.display());
                return EXIT_FAILURE;
            }
            if !quiet {
                println!(
                    "Graph written to {}: {} nodes, {} edges",
                    out_path.display(),
                    graph.nodes.len(),
                    graph.edges.len()
                );
            }
        }
        None => match graph.to_json_string(pretty) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("JSON encode error: {e}");
                return EXIT_FAILURE;
            }
        },
    }
    EXIT_OK
}

fn load_graph(path: &Path) -> Result<ResourceGraph, i32> {
    ResourceGraph::load_json(path).map_err(|e| {
        eprintln!("Load graph failed: {e}");
        EXIT_FAILURE
    })
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{s}");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("JSON encode error: {e}");
            EXIT_FAILURE
        }
    }
}

fn run_query(query: QueryCommands) -> i32 {
    match query {
        QueryCommands::Summary { graph, format } => {
            let graph = match load_graph(&graph) {
                Ok(g) => g,
                Err(code) => return code,
            };
            let summary = SummaryQuery::new().run(&graph);
            if matches!(format, OutputFormat::Json) {
                return print_json(&summary);
            }
            println!(
                "{} graph: {} nodes, {} edges",
                summary.parser.as_deref().unwrap_or("unknown"),
                summary.node_count,
                summary.edge_count
            );
            let mut rows: Vec<Vec<String>> = summary
                .nodes_by_type
                .iter()
                .map(|(t, n)| vec!["node".to_string(), t.clone(), n.to_string()])
                .collect();
            rows.extend(
                summary.edges_by_reason.iter().map(|(r, n)| vec!["edge".to_string(), r.clone(), n.to_string()]),
            );
            println!("{}", table::render(&["Kind", "Type/Reason", "Count"], &rows));
            EXIT_OK
        }
        QueryCommands::Neighbors { graph, node, direction, format } => {
            let graph = match load_graph(&graph) {
                Ok(g) => g,
                Err(code) => return code,
            };
            let results = NeighborsQuery::new(&node, direction.into()).run(&graph);
            if matches!(format, OutputFormat::Json) {
                return print_json(&results);
            }
            if results.is_empty() {
                println!("<no neighbors>");
                return EXIT_OK;
            }
            let rows: Vec<Vec<String>> = results
                .iter()
                .map(|n| vec![n.direction.to_string(), n.reason.to_string(), n.id.to_string()])
                .collect();
            println!("{}", table::render(&["Dir", "Reason", "Node"], &rows));
            EXIT_OK
        }
        QueryCommands::Dangling { graph, format } => {
            let graph = match load_graph(&graph) {
                Ok(g) => g,
                Err(code) => return code,
            };
            let results = DanglingEdgesQuery::new().run(&graph);
            if matches!(format, OutputFormat::Json) {
                return print_json(&results);
            }
            if results.is_empty() {
                println!("<no dangling edges>");
                return EXIT_OK;
            }
            let rows: Vec<Vec<String>> = results
                .iter()
                .map(|e| vec![e.from_id.to_string(), e.to_id.to_string(), e.reason.to_string()])
                .collect();
            println!("{}", table::render(&["From", "To", "Reason"], &rows));
            EXIT_OK
        }
        QueryCommands::Cycles { graph, format } => {
            let graph = match load_graph(&graph) {
                Ok(g) => g,
                Err(code) => return code,
            };
            let cycles = CyclesQuery::new().run(&graph);
            if matches!(format, OutputFormat::Json) {
                return print_json(&cycles);
            }
            if cycles.is_empty() {
                println!("<no cycles>");
            }
            for cycle in cycles {
                let parts: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
                println!("{}", parts.join(" -> "));
            }
            EXIT_OK
        }
    }
}
