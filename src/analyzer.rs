//! Static repository scan that feeds the generation prompt.
//!
//! The scan is a pure function of the tree and the [`AnalyzerRules`] it was
//! built with: entries are visited in file-name order, so repeated runs over
//! the same tree produce identical output.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;
use walkdir::{DirEntry, WalkDir};

use crate::models::RepositoryAnalysis;

/// Maps a manifest file to the project type and dependency manager it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRule {
    pub file: String,
    pub project_type: String,
    pub manager: String,
}

impl ManifestRule {
    fn new(file: &str, project_type: &str, manager: &str) -> Self {
        Self {
            file: file.to_string(),
            project_type: project_type.to_string(),
            manager: manager.to_string(),
        }
    }
}

/// Lookup tables driving the scan.
#[derive(Debug, Clone)]
pub struct AnalyzerRules {
    pub entry_points: Vec<String>,
    /// Matched case-insensitively against directory names.
    pub key_directories: Vec<String>,
    pub config_files: Vec<String>,
    /// Extension without the dot, mapped to a language name.
    pub languages: BTreeMap<String, String>,
    pub skipped_dirs: Vec<String>,
    /// Hidden entries that are still scanned.
    pub hidden_allowed: Vec<String>,
    /// Checked in order; the first config file that matches decides the type.
    pub manifests: Vec<ManifestRule>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for AnalyzerRules {
    fn default() -> Self {
        Self {
            entry_points: strings(&[
                "main.go", "index.js", "index.ts", "app.js", "app.ts", "server.js", "server.ts",
                "index.html", "App.tsx", "App.jsx", "main.rs", "main.py",
            ]),
            key_directories: strings(&[
                "handlers",
                "controllers",
                "routes",
                "api",
                "services",
                "business",
                "logic",
                "models",
                "entities",
                "schemas",
                "repositories",
                "data",
                "db",
                "utils",
                "helpers",
                "lib",
                "middleware",
                "middlewares",
                "config",
                "configuration",
                "tests",
                "test",
                "__tests__",
            ]),
            config_files: strings(&[
                "go.mod",
                "package.json",
                "requirements.txt",
                "Pipfile",
                "pom.xml",
                "build.gradle",
                "Cargo.toml",
                "composer.json",
                ".env.example",
                "config.yaml",
                "config.yml",
                "config.json",
                "Dockerfile",
                "docker-compose.yml",
            ]),
            languages: [
                ("go", "Go"),
                ("js", "JavaScript"),
                ("ts", "TypeScript"),
                ("py", "Python"),
                ("java", "Java"),
                ("rb", "Ruby"),
                ("php", "PHP"),
                ("cs", "C#"),
                ("rs", "Rust"),
                ("cpp", "C++"),
                ("c", "C"),
            ]
            .into_iter()
            .map(|(ext, lang)| (ext.to_string(), lang.to_string()))
            .collect(),
            skipped_dirs: strings(&["node_modules", "vendor", "venv", "__pycache__"]),
            hidden_allowed: strings(&[".env.example"]),
            manifests: vec![
                ManifestRule::new("go.mod", "Go Application", "Go Modules"),
                ManifestRule::new("package.json", "Node.js Application", "npm/yarn"),
                ManifestRule::new("requirements.txt", "Python Application", "pip"),
                ManifestRule::new("Pipfile", "Python Application", "pipenv"),
                ManifestRule::new("pom.xml", "Java Application", "Maven"),
                ManifestRule::new("build.gradle", "Java Application", "Gradle"),
                ManifestRule::new("Cargo.toml", "Rust Application", "Cargo"),
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    rules: AnalyzerRules,
}

impl Analyzer {
    pub fn new(rules: AnalyzerRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &AnalyzerRules {
        &self.rules
    }

    fn is_skipped(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') && !self.rules.hidden_allowed.iter().any(|h| *h == name) {
            return true;
        }
        entry.file_type().is_dir() && self.rules.skipped_dirs.iter().any(|d| *d == name)
    }

    pub fn analyze(&self, root: &Path) -> Result<RepositoryAnalysis> {
        let mut analysis = RepositoryAnalysis::default();

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_skipped(e));

        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to scan {}", root.display()))?;
            if entry.depth() == 0 {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();

            if entry.file_type().is_dir() {
                if self
                    .rules
                    .key_directories
                    .iter()
                    .any(|k| k.eq_ignore_ascii_case(&name))
                {
                    analysis.key_directories.push(rel);
                }
                continue;
            }

            if self.rules.entry_points.iter().any(|e| *e == name) {
                analysis.entry_points.push(rel.clone());
            }
            if self.rules.config_files.iter().any(|c| *c == name) {
                analysis.config_files.push(rel);
            }
            if let Some(lang) = entry
                .path()
                .extension()
                .and_then(|ext| self.rules.languages.get(&*ext.to_string_lossy()))
                && !analysis.languages.contains(lang)
            {
                analysis.languages.push(lang.clone());
            }
        }

        analysis.project_type = self.project_type(&analysis);
        analysis.dependency_managers = self.dependency_managers(&analysis);
        analysis.patterns = detect_patterns(&analysis.key_directories);

        info!(
            entry_points = analysis.entry_points.len(),
            key_dirs = analysis.key_directories.len(),
            config_files = analysis.config_files.len(),
            languages = ?analysis.languages,
            project_type = %analysis.project_type,
            "repository analysis complete"
        );

        Ok(analysis)
    }

    fn manifests_for<'a>(&'a self, config_file: &'a str) -> impl Iterator<Item = &'a ManifestRule> {
        let name = Path::new(config_file)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.rules.manifests.iter().filter(move |m| m.file == name)
    }

    fn project_type(&self, analysis: &RepositoryAnalysis) -> String {
        for config in &analysis.config_files {
            if let Some(rule) = self.manifests_for(config).next() {
                return rule.project_type.clone();
            }
        }
        match analysis.languages.first() {
            Some(lang) => format!("{} Application", lang),
            None => "Unknown".to_string(),
        }
    }

    fn dependency_managers(&self, analysis: &RepositoryAnalysis) -> Vec<String> {
        let mut managers: Vec<String> = Vec::new();
        for config in &analysis.config_files {
            for rule in self.manifests_for(config) {
                if !managers.contains(&rule.manager) {
                    managers.push(rule.manager.clone());
                }
            }
        }
        managers
    }
}

fn mentions_any(dirs: &[String], needles: &[&str]) -> bool {
    dirs.iter().any(|dir| {
        let dir = dir.to_lowercase();
        needles.iter().any(|n| dir.contains(n))
    })
}

fn detect_patterns(key_directories: &[String]) -> BTreeMap<String, String> {
    let mut patterns = BTreeMap::new();
    let handlers = mentions_any(key_directories, &["handlers", "controllers", "routes"]);
    let services = mentions_any(key_directories, &["services", "business"]);
    let models = mentions_any(key_directories, &["models", "entities"]);
    let repositories = mentions_any(key_directories, &["repositories", "data"]);

    let architecture = if handlers && services && models && repositories {
        Some("Clean Architecture (Handlers -> Services -> Repositories -> Models)")
    } else if handlers && services {
        Some("Layered Architecture")
    } else if handlers {
        Some("MVC-like")
    } else {
        None
    };
    if let Some(arch) = architecture {
        patterns.insert("architecture".to_string(), arch.to_string());
    }
    if mentions_any(key_directories, &["api", "routes", "handlers"]) {
        patterns.insert("api_style".to_string(), "RESTful API".to_string());
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn go_service(root: &Path) {
        touch(root, "main.go");
        touch(root, "go.mod");
        touch(root, "handlers/health.go");
        touch(root, "services/health_service.go");
        touch(root, "models/status.go");
        touch(root, "repositories/status_repo.go");
        touch(root, ".env.example");
        touch(root, ".git/config");
        touch(root, "vendor/github.com/lib/x.go");
        touch(root, "web/index.js");
    }

    #[test]
    fn test_analyze_go_service() {
        let dir = tempdir().unwrap();
        go_service(dir.path());

        let analysis = Analyzer::default().analyze(dir.path()).unwrap();
        assert_eq!(analysis.entry_points, vec!["main.go", "web/index.js"]);
        assert_eq!(analysis.config_files, vec![".env.example", "go.mod"]);
        assert_eq!(
            analysis.key_directories,
            vec!["handlers", "models", "repositories", "services"]
        );
        assert_eq!(analysis.languages, vec!["Go", "JavaScript"]);
        assert_eq!(analysis.project_type, "Go Application");
        assert_eq!(analysis.dependency_managers, vec!["Go Modules"]);
        assert_eq!(
            analysis.patterns.get("architecture").map(String::as_str),
            Some("Clean Architecture (Handlers -> Services -> Repositories -> Models)")
        );
        assert_eq!(
            analysis.patterns.get("api_style").map(String::as_str),
            Some("RESTful API")
        );
    }

    #[test]
    fn test_hidden_and_vendored_entries_are_skipped() {
        let dir = tempdir().unwrap();
        touch(dir.path(), ".github/workflows/ci.yml");
        touch(dir.path(), "node_modules/pkg/index.js");
        touch(dir.path(), "src/lib.rs");

        let analysis = Analyzer::default().analyze(dir.path()).unwrap();
        assert!(analysis.entry_points.is_empty());
        assert_eq!(analysis.languages, vec!["Rust"]);
        assert_eq!(analysis.project_type, "Rust Application");
        assert!(analysis.dependency_managers.is_empty());
    }

    #[test]
    fn test_key_directories_match_case_insensitively() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "Controllers/Home.cs");
        touch(dir.path(), "Services/Mailer.cs");

        let analysis = Analyzer::default().analyze(dir.path()).unwrap();
        assert_eq!(analysis.key_directories, vec!["Controllers", "Services"]);
        assert_eq!(
            analysis.patterns.get("architecture").map(String::as_str),
            Some("Layered Architecture")
        );
        assert!(!analysis.patterns.contains_key("api_style"));
    }

    #[test]
    fn test_empty_tree_is_unknown() {
        let dir = tempdir().unwrap();
        let analysis = Analyzer::default().analyze(dir.path()).unwrap();
        assert_eq!(analysis.project_type, "Unknown");
        assert!(analysis.patterns.is_empty());
    }

    #[test]
    fn test_analysis_is_identical_across_runs() {
        let dir = tempdir().unwrap();
        go_service(dir.path());
        touch(dir.path(), "package.json");
        touch(dir.path(), "api/routes.ts");

        let analyzer = Analyzer::default();
        let first = analyzer.analyze(dir.path()).unwrap();
        let second = analyzer.analyze(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.dependency_managers, vec!["Go Modules", "npm/yarn"]);
    }

    #[test]
    fn test_custom_rules_replace_defaults() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "build.zig");
        touch(dir.path(), "src/main.zig");

        let mut rules = AnalyzerRules::default();
        rules.config_files.push("build.zig".into());
        rules.languages.insert("zig".into(), "Zig".into());
        rules
            .manifests
            .push(ManifestRule::new("build.zig", "Zig Application", "zig build"));

        let analysis = Analyzer::new(rules).analyze(dir.path()).unwrap();
        assert_eq!(analysis.languages, vec!["Zig"]);
        assert_eq!(analysis.project_type, "Zig Application");
        assert_eq!(analysis.dependency_managers, vec!["zig build"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(Analyzer::default().analyze(&dir.path().join("absent")).is_err());
    }
}
