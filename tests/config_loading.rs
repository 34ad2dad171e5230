use iac_graph::parser::reference::ModuleQualification;
use iac_graph::utils::config::{self, CONFIG_FILE_NAME};
use std::fs;
use std::path::{Path, PathBuf};

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    fs::write(path, content).unwrap();
}

#[test]
fn parses_full_config_file() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg_path = tmp.path().join("custom.toml");
    let data = r#"
[terraform]
module_qualification = "single"

[helm]
binary = "/opt/helm/bin/helm"
release_name = "shop"
namespace = "prod"
values = ["values.yaml", "values-prod.yaml"]

[output]
pretty = false

[log]
level = "iac_graph=debug"
"#;
    write(&cfg_path, data);

    let cfg = config::load_config_at(&cfg_path).expect("config parsed");
    assert_eq!(cfg.module_qualification(), Some(ModuleQualification::Single));
    assert_eq!(cfg.pretty(), Some(false));
    assert_eq!(cfg.log_level(), Some("iac_graph=debug"));

    let helm = cfg.helm.expect("helm table");
    assert_eq!(helm.binary.as_deref(), Some("/opt/helm/bin/helm"));
    assert_eq!(helm.release_name.as_deref(), Some("shop"));
    assert_eq!(helm.namespace.as_deref(), Some("prod"));
    assert_eq!(
        helm.values,
        Some(vec![PathBuf::from("values.yaml"), PathBuf::from("values-prod.yaml")])
    );
}

#[test]
fn missing_tables_fall_back_to_none() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg_path = tmp.path().join(CONFIG_FILE_NAME);
    write(&cfg_path, "[output]\npretty = true\n");

    let cfg = config::load_config_at(&cfg_path).expect("config parsed");
    assert_eq!(cfg.module_qualification(), None);
    assert_eq!(cfg.log_level(), None);
    assert!(cfg.helm.is_none());
}

#[test]
fn load_config_near_looks_beside_files_and_inside_directories() {
    let tmp = tempfile::tempdir().unwrap();
    write(&tmp.path().join(CONFIG_FILE_NAME), "[terraform]\nmodule_qualification = 'nested'\n");
    let plan = tmp.path().join("plan.json");
    write(&plan, "{}");

    let beside = config::load_config_near(&plan).expect("found beside input file");
    assert_eq!(beside.module_qualification(), Some(ModuleQualification::Nested));
    let inside = config::load_config_near(tmp.path()).expect("found inside input dir");
    assert_eq!(inside, beside);
}

#[test]
fn invalid_or_absent_config_yields_none() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(config::load_config_near(tmp.path()).is_none());

    let bad = tmp.path().join("bad.toml");
    write(&bad, "[terraform]\nmodule_qualification = \"sideways\"\n");
    assert!(config::load_config_at(&bad).is_none());
}
