pub mod table {
    // Display width in characters, not bytes
    fn width(s: &str) -> usize {
        s.chars().count()
    }

    fn rule(widths: &[usize]) -> String {
        let mut s = String::from("+");
        for w in widths {
            s.push_str(&"-".repeat(w + 2));
            s.push('+');
        }
        s
    }

    fn row_line(cells: &[&str], widths: &[usize]) -> String {
        let mut s = String::from("|");
        for (cell, w) in cells.iter().zip(widths) {
            s.push(' ');
            s.push_str(cell);
            s.push_str(&" ".repeat(w.saturating_sub(width(cell))));
            s.push_str(" |");
        }
        s
    }

    /// Render an ASCII table. Short rows are padded with empty cells, extra cells are dropped.
    #[must_use]
    pub fn render(headers: &[&str], rows: &[Vec<String>]) -> String {
        let mut widths: Vec<usize> = headers.iter().map(|h| width(h)).collect();
        for row in rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(width(cell));
            }
        }

        let rule = rule(&widths);
        let mut out = Vec::with_capacity(rows.len() + 4);
        out.push(rule.clone());
        out.push(row_line(headers, &widths));
        out.push(rule.clone());
        for row in rows {
            let cells: Vec<&str> =
                (0..headers.len()).map(|i| row.get(i).map_or("", String::as_str)).collect();
            out.push(row_line(&cells, &widths));
        }
        out.push(rule);
        out.join("\n")
    }
}

pub mod config {
    //! `iac-graph.toml` loading.
    use serde::Deserialize;
    use std::fs;
    use std::path::{Path, PathBuf};

    use crate::parser::reference::ModuleQualification;

    pub const CONFIG_FILE_NAME: &str = "iac-graph.toml";

    #[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
    pub struct TerraformConfig {
        pub module_qualification: Option<ModuleQualification>,
    }

    #[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
    pub struct HelmConfig {
        pub binary: Option<String>,
        pub release_name: Option<String>,
        pub namespace: Option<String>,
        pub values: Option<Vec<PathBuf>>,
    }

    #[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
    pub struct OutputConfig {
        pub pretty: Option<bool>,
    }

    #[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
    pub struct LogConfig {
        /// An `EnvFilter` directive such as `info` or `iac_graph=debug`.
        pub level: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
    pub struct Config {
        pub terraform: Option<TerraformConfig>,
        pub helm: Option<HelmConfig>,
        pub output: Option<OutputConfig>,
        pub log: Option<LogConfig>,
    }

    impl Config {
        #[must_use]
        pub fn module_qualification(&self) -> Option<ModuleQualification> {
            self.terraform.as_ref().and_then(|t| t.module_qualification)
        }

        #[must_use]
        pub fn pretty(&self) -> Option<bool> {
            self.output.as_ref().and_then(|o| o.pretty)
        }

        #[must_use]
        pub fn log_level(&self) -> Option<&str> {
            self.log.as_ref().and_then(|l| l.level.as_deref())
        }
    }

    /// Read a config file. Unreadable or invalid files yield `None`.
    #[must_use]
    pub fn load_config_at(path: &Path) -> Option<Config> {
        let data = fs::read_to_string(path).ok()?;
        toml::from_str::<Config>(&data).ok()
    }

    /// Look for `iac-graph.toml` next to `input`: inside it when it is a
    /// directory, beside it otherwise.
    #[must_use]
    pub fn load_config_near(input: &Path) -> Option<Config> {
        let dir = if input.is_dir() { input } else { input.parent()? };
        let path = dir.join(CONFIG_FILE_NAME);
        if path.is_file() {
            load_config_at(&path)
        } else {
            None
        }
    }
}

pub mod file_walker {
    use std::ffi::OsStr;
    use std::path::{Path, PathBuf};

    fn is_manifest(path: &Path) -> bool {
        matches!(path.extension().and_then(OsStr::to_str), Some("yaml" | "yml"))
    }

    /// Discover `*.yaml`/`*.yml` files under `root`, optionally bypassing
    /// `.gitignore`/`.ignore` rules. The result is sorted.
    #[must_use]
    pub fn manifest_files_with_options(root: &Path, no_ignore: bool) -> Vec<PathBuf> {
        let mut walker = ignore::WalkBuilder::new(root);
        walker
            .follow_links(false)
            .hidden(true)
            .git_ignore(!no_ignore)
            .git_global(false)
            .git_exclude(false)
            .ignore(!no_ignore)
            // Honour ignore files in non-git directories too
            .require_git(false)
            .parents(true);
        let mut out: Vec<PathBuf> = walker
            .build()
            .flatten()
            .filter(|e| e.file_type().is_some_and(|t| t.is_file()))
            .map(ignore::DirEntry::into_path)
            .filter(|p| is_manifest(p))
            .collect();
        out.sort();
        out
    }

    /// As `manifest_files_with_options`, reading `IAC_GRAPH_NO_IGNORE` for the bypass.
    #[must_use]
    pub fn manifest_files(root: &Path) -> Vec<PathBuf> {
        let no_ignore = std::env::var("IAC_GRAPH_NO_IGNORE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        manifest_files_with_options(root, no_ignore)
    }
}
