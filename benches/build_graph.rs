use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use iac_graph::parser::kubernetes::KubernetesParser;
use iac_graph::parser::reference::ModuleQualification;
use iac_graph::parser::terraform::TerraformParser;
use serde_json::{json, Value};

// Chain of modules, each holding a VPC and subnets that reference it.
fn synthetic_plan(modules: usize, subnets: usize) -> Value {
    let mut changes = Vec::new();
    for m in 0..modules {
        let module = format!("module.net{m}");
        changes.push(json!({
            "address": format!("{module}.aws_vpc.main"),
            "module_address": module,
            "type": "aws_vpc",
            "name": "main",
            "change": {"actions": ["create"], "after": {"cidr_block": "10.0.0.0/16"}}
        }));
        for s in 0..subnets {
            changes.push(json!({
                "address": format!("{module}.aws_subnet.s{s}"),
                "module_address": module,
                "type": "aws_subnet",
                "name": format!("s{s}"),
                "change": {"actions": ["create"], "after": {
                    "vpc_id": "${aws_vpc.main.id}",
                    "tags": {"Name": format!("subnet-{s}"), "note": "see var.region"}
                }}
            }));
        }
    }
    json!({"format_version": "1.2", "resource_changes": changes})
}

fn synthetic_manifests(apps: usize) -> String {
    let mut out = String::new();
    for i in 0..apps {
        out.push_str(&format!(
            "---\nkind: Service\nmetadata: {{name: app{i}}}\nspec: {{selector: {{app: app{i}}}}}\n\
             ---\nkind: ConfigMap\nmetadata: {{name: app{i}-cfg}}\n\
             ---\nkind: Deployment\nmetadata: {{name: app{i}}}\nspec:\n  template:\n    metadata: {{labels: {{app: app{i}}}}}\n    spec:\n      containers:\n        - name: c\n          envFrom:\n            - configMapRef: {{name: app{i}-cfg}}\n"
        ));
    }
    out
}

fn bench_build_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_graph");

    for (modules, subnets) in [(10, 10), (50, 20)] {
        let plan = synthetic_plan(modules, subnets);
        let parser = TerraformParser::with_qualification(ModuleQualification::Nested);
        group.bench_function(BenchmarkId::new("terraform", modules * (subnets + 1)), |b| {
            b.iter(|| {
                let graph = parser.parse_plan(black_box(&plan)).expect("parse plan");
                black_box(graph.edges.len())
            })
        });
    }

    for apps in [10, 100] {
        let text = synthetic_manifests(apps);
        let parser = KubernetesParser::new();
        group.bench_function(BenchmarkId::new("kubernetes", apps * 3), |b| {
            b.iter(|| {
                let graph = parser.parse_str(black_box(&text), None);
                black_box(graph.edges.len())
            })
        });
    }

    group.finish();
}

criterion_group!(name = benches; config = Criterion::default(); targets = bench_build_graph);
criterion_main!(benches);
