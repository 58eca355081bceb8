//! Instruction text handed to the code-generation job.

use std::fmt::Write;

use crate::models::{Project, RepositoryAnalysis, WorkRequest};

const GUIDELINES: &[&str] = &[
    "Follow the existing code patterns and architecture detected in the repository",
    "Maintain consistency with the project's coding style and conventions",
    "Add appropriate error handling and logging",
    "Ensure the changes integrate seamlessly with existing code",
    "Write clean, maintainable, and well-documented code",
    "Add unit tests if applicable",
];

fn bullet_list(out: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "**{}**:", heading);
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
    out.push('\n');
}

pub fn build_instruction(
    request: &WorkRequest,
    project: &Project,
    analysis: &RepositoryAnalysis,
) -> String {
    let mut out = String::new();
    let _ = write!(out, "# Development Task: {}\n\n", request.jira_issue_key);
    let _ = write!(out, "## Summary\n{}\n\n", request.summary);
    if !request.description.is_empty() {
        let _ = write!(out, "## Description\n{}\n\n", request.description);
    }

    out.push_str("## Project Context\n\n");
    let _ = writeln!(out, "**Project**: {}", project.name);
    let _ = writeln!(out, "**Project Type**: {}", analysis.project_type);
    if !analysis.languages.is_empty() {
        let _ = writeln!(out, "**Languages**: {}", analysis.languages.join(", "));
    }
    if !project.scope.is_empty() {
        let _ = write!(out, "**Project Scope**: {}\n\n", project.scope);
    }

    out.push_str("## Repository Structure\n\n");
    bullet_list(&mut out, "Entry Points", &analysis.entry_points);
    bullet_list(&mut out, "Key Directories", &analysis.key_directories);
    let patterns: Vec<String> = analysis
        .patterns
        .iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect();
    bullet_list(&mut out, "Detected Patterns", &patterns);

    out.push_str("## Instructions\n\n");
    out.push_str("Please implement the requested changes following these guidelines:\n\n");
    for (i, line) in GUIDELINES.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, line);
    }
    out.push('\n');
    out.push_str("Please implement the changes and provide a summary of what was modified.\n");
    out
}

/// Short project summary logged alongside each generation run.
pub fn project_context(project: &Project, analysis: &RepositoryAnalysis) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Project: {}", project.name);
    let _ = writeln!(out, "Type: {}", analysis.project_type);
    if !analysis.languages.is_empty() {
        let _ = writeln!(out, "Languages: {}", analysis.languages.join(", "));
    }
    if !analysis.dependency_managers.is_empty() {
        let _ = writeln!(
            out,
            "Dependency Managers: {}",
            analysis.dependency_managers.join(", ")
        );
    }
    if let Some(arch) = analysis.patterns.get("architecture") {
        let _ = writeln!(out, "Architecture: {}", arch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(description: &str) -> WorkRequest {
        WorkRequest {
            jira_issue_id: "10001".into(),
            jira_issue_key: "PROJ-1".into(),
            jira_project_key: "PROJ".into(),
            summary: "Add health endpoint".into(),
            description: description.into(),
            repository: None,
        }
    }

    fn project() -> Project {
        Project {
            id: "p".into(),
            name: "Acme".into(),
            description: String::new(),
            scope: "Payments backend".into(),
            jira_project_key: "PROJ".into(),
            repositories: vec![],
        }
    }

    fn analysis() -> RepositoryAnalysis {
        RepositoryAnalysis {
            entry_points: vec!["main.go".into()],
            key_directories: vec!["handlers".into(), "services".into()],
            config_files: vec!["go.mod".into()],
            languages: vec!["Go".into(), "JavaScript".into()],
            patterns: [
                ("architecture".to_string(), "Layered Architecture".to_string()),
                ("api_style".to_string(), "RESTful API".to_string()),
            ]
            .into_iter()
            .collect(),
            project_type: "Go Application".into(),
            dependency_managers: vec!["Go Modules".into()],
        }
    }

    #[test]
    fn test_instruction_sections() {
        let text = build_instruction(&request("Expose GET /health"), &project(), &analysis());
        assert!(text.starts_with("# Development Task: PROJ-1\n\n## Summary\nAdd health endpoint\n\n"));
        assert!(text.contains("## Description\nExpose GET /health\n\n"));
        assert!(text.contains("**Project**: Acme\n**Project Type**: Go Application\n**Languages**: Go, JavaScript\n"));
        assert!(text.contains("**Project Scope**: Payments backend\n\n"));
        assert!(text.contains("**Entry Points**:\n- main.go\n\n"));
        assert!(text.contains("**Key Directories**:\n- handlers\n- services\n\n"));
        assert!(text.contains("6. Add unit tests if applicable\n"));
        assert!(text.ends_with("provide a summary of what was modified.\n"));
    }

    #[test]
    fn test_instruction_patterns_are_in_stable_order() {
        let text = build_instruction(&request(""), &project(), &analysis());
        let api = text.find("- api_style: RESTful API").unwrap();
        let arch = text.find("- architecture: Layered Architecture").unwrap();
        assert!(api < arch);
        assert!(!text.contains("## Description"));
    }

    #[test]
    fn test_empty_analysis_omits_structure_lists() {
        let text = build_instruction(&request(""), &project(), &RepositoryAnalysis::default());
        assert!(!text.contains("**Entry Points**"));
        assert!(!text.contains("**Languages**"));
        assert!(text.contains("## Repository Structure\n\n## Instructions"));
    }

    #[test]
    fn test_project_context() {
        let text = project_context(&project(), &analysis());
        assert_eq!(
            text,
            "Project: Acme\nType: Go Application\nLanguages: Go, JavaScript\nDependency Managers: Go Modules\nArchitecture: Layered Architecture\n"
        );
    }
}
