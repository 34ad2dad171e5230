use iac_graph::app::{run_cli, EXIT_FAILURE, EXIT_OK, EXIT_UNSUPPORTED};
use iac_graph::cli::{Cli, Commands, DirectionArg, FamilyArg, OutputFormat, QueryCommands};
use iac_graph::graph::ResourceGraph;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const MANIFESTS: &str = r#"
kind: Service
metadata:
  name: api
spec:
  selector:
    app: api
---
kind: Pod
metadata:
  name: api-0
  labels:
    app: api
spec:
  containers:
    - name: api
      env:
        - name: TOKEN
          valueFrom:
            secretKeyRef:
              name: api-token
              key: token
---
kind: Secret
metadata:
  name: api-token
"#;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    fs::write(path, content).unwrap();
}

fn ingest_cli(path: PathBuf, out: Option<PathBuf>) -> Cli {
    Cli {
        quiet: true,
        verbose: 0,
        command: Commands::Ingest {
            path,
            family: None,
            out,
            values: Vec::new(),
            namespace: None,
            release: None,
            config: None,
            compact: false,
        },
    }
}

fn query_cli(query: QueryCommands) -> Cli {
    Cli { quiet: false, verbose: 0, command: Commands::Query { query } }
}

fn ingested_graph(root: &Path) -> PathBuf {
    let manifest = root.join("app.yaml");
    write_file(&manifest, MANIFESTS);
    let out = root.join("graph.json");
    assert_eq!(run_cli(ingest_cli(manifest, Some(out.clone()))), EXIT_OK);
    out
}

#[test]
fn app_ingest_writes_graph_file() {
    let dir = tempdir().unwrap();
    let out = ingested_graph(dir.path());
    let g = ResourceGraph::load_json(&out).unwrap();
    assert_eq!(g.nodes.len(), 3);
    assert_eq!(g.edges.len(), 2);
    assert_eq!(g.meta["parser"], "kubernetes");
}

#[test]
fn app_ingest_explicit_family_and_namespace() {
    let dir = tempdir().unwrap();
    let manifest = dir.path().join("objects.txt");
    write_file(&manifest, MANIFESTS);
    let out = dir.path().join("graph.json");
    let mut cli = ingest_cli(manifest, Some(out.clone()));
    if let Commands::Ingest { family, namespace, compact, .. } = &mut cli.command {
        *family = Some(FamilyArg::Kubernetes);
        *namespace = Some("payments".into());
        *compact = true;
    }
    assert_eq!(run_cli(cli), EXIT_OK);
    let text = fs::read_to_string(&out).unwrap();
    assert!(!text.contains('\n'));
    assert!(text.contains("k8s:service:payments/api"));
}

#[test]
fn app_ingest_exit_codes() {
    let dir = tempdir().unwrap();
    let unknown = dir.path().join("main.tf");
    write_file(&unknown, "resource \"aws_vpc\" \"main\" {}\n");
    assert_eq!(run_cli(ingest_cli(unknown, None)), EXIT_UNSUPPORTED);

    let broken = dir.path().join("plan.json");
    write_file(&broken, "[1, 2, 3]");
    assert_eq!(run_cli(ingest_cli(broken, None)), EXIT_FAILURE);

    let missing = dir.path().join("nothing-here.yaml");
    assert_eq!(run_cli(ingest_cli(missing, None)), EXIT_FAILURE);
}

#[test]
fn app_query_summary_text_and_json() {
    let dir = tempdir().unwrap();
    let graph = ingested_graph(dir.path());
    for format in [OutputFormat::Text, OutputFormat::Json] {
        let cli = query_cli(QueryCommands::Summary { graph: graph.clone(), format });
        assert_eq!(run_cli(cli), EXIT_OK);
    }
}

#[test]
fn app_query_neighbors_all_directions() {
    let dir = tempdir().unwrap();
    let graph = ingested_graph(dir.path());
    for direction in [DirectionArg::Out, DirectionArg::In, DirectionArg::Both] {
        let cli = query_cli(QueryCommands::Neighbors {
            graph: graph.clone(),
            node: "k8s:pod:default/api-0".into(),
            direction,
            format: OutputFormat::Text,
        });
        assert_eq!(run_cli(cli), EXIT_OK);
    }
    // Unknown node: empty result, still success
    let cli = query_cli(QueryCommands::Neighbors {
        graph,
        node: "k8s:pod:default/ghost".into(),
        direction: DirectionArg::Both,
        format: OutputFormat::Json,
    });
    assert_eq!(run_cli(cli), EXIT_OK);
}

#[test]
fn app_query_dangling_and_cycles() {
    let dir = tempdir().unwrap();
    let graph = ingested_graph(dir.path());
    assert_eq!(
        run_cli(query_cli(QueryCommands::Dangling { graph: graph.clone(), format: OutputFormat::Json })),
        EXIT_OK
    );
    assert_eq!(run_cli(query_cli(QueryCommands::Cycles { graph, format: OutputFormat::Text })), EXIT_OK);
}

#[test]
fn app_query_on_missing_graph_fails() {
    let dir = tempdir().unwrap();
    let cli = query_cli(QueryCommands::Summary {
        graph: dir.path().join("absent.json"),
        format: OutputFormat::Text,
    });
    assert_eq!(run_cli(cli), EXIT_FAILURE);
}

#[test]
fn app_helm_namespace_setting_leaves_manifests_alone() {
    let dir = tempdir().unwrap();
    let manifest = dir.path().join("app.yaml");
    write_file(&manifest, MANIFESTS);
    write_file(&dir.path().join("iac-graph.toml"), "[helm]\nnamespace = \"charts\"\n");
    let out = dir.path().join("graph.json");
    assert_eq!(run_cli(ingest_cli(manifest, Some(out.clone()))), EXIT_OK);

    let g = ResourceGraph::load_json(&out).unwrap();
    assert!(g.nodes.iter().all(|n| n.namespace.as_deref() == Some("default")));
    assert!(g.nodes.iter().any(|n| n.id.as_str() == "k8s:service:default/api"));
}
