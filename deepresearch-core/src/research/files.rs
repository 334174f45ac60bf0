//! Projection of a research state onto a set of Markdown files.
//!
//! The projection is pure: it is recomputed from the state on demand and only
//! touches the filesystem through [`write_files`].

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::state::{QuestionAnalysis, ResearchPlan, ResearchState};
use crate::persistence;

/// Which part of the research a generated file renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Analysis,
    Plan,
    Section,
    Report,
}

/// A Markdown artifact derived from the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedFile {
    /// Relative path using `/` separators, e.g. `sections/01-overview.md`.
    pub path: String,
    pub title: String,
    pub kind: FileKind,
    pub content: String,
    pub size: usize,
}

impl GeneratedFile {
    fn new(path: String, title: impl Into<String>, kind: FileKind, content: String) -> Self {
        Self {
            size: content.len(),
            path,
            title: title.into(),
            kind,
            content,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    File,
    Directory,
}

/// Directory tree over a set of generated files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub path: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
    /// File size in bytes, or the total of all descendants for directories.
    pub size: usize,
}

impl FileNode {
    fn directory(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            kind: NodeKind::Directory,
            children: Vec::new(),
            size: 0,
        }
    }

    /// Number of files below this node.
    pub fn file_count(&self) -> usize {
        match self.kind {
            NodeKind::File => 1,
            NodeKind::Directory => self.children.iter().map(FileNode::file_count).sum(),
        }
    }
}

/// Every file the current state can produce, in a stable order.
pub fn project_files(state: &ResearchState) -> Vec<GeneratedFile> {
    let mut files = Vec::new();

    if let Some(analysis) = &state.analysis {
        files.push(GeneratedFile::new(
            "analysis.md".into(),
            "Question Analysis",
            FileKind::Analysis,
            render_analysis(&state.question, analysis),
        ));
    }
    if let Some(plan) = &state.plan {
        files.push(GeneratedFile::new(
            "plan.md".into(),
            "Research Plan",
            FileKind::Plan,
            render_plan(plan),
        ));
    }
    for section in state.ordered_content() {
        let path = format!(
            "sections/{:02}-{}.md",
            section.section_index + 1,
            slugify(&section.title)
        );
        let content = format!("# {}\n\n{}\n", section.title.trim(), section.content.trim());
        files.push(GeneratedFile::new(
            path,
            section.title.clone(),
            FileKind::Section,
            content,
        ));
    }
    if let Some(report) = &state.final_report {
        files.push(GeneratedFile::new(
            "report.md".into(),
            "Final Report",
            FileKind::Report,
            report.clone(),
        ));
    }
    files
}

fn render_analysis(question: &str, analysis: &QuestionAnalysis) -> String {
    let mut out = String::from("# Question Analysis\n\n");
    let _ = writeln!(out, "**Question**: {question}\n");
    let _ = writeln!(out, "**Topic**: {}\n", analysis.topic);
    let _ = writeln!(out, "**Scope**: {}\n", analysis.scope);
    if !analysis.sub_questions.is_empty() {
        out.push_str("## Sub-questions\n\n");
        for q in &analysis.sub_questions {
            let _ = writeln!(out, "- {q}");
        }
        out.push('\n');
    }
    if !analysis.key_concepts.is_empty() {
        out.push_str("## Key Concepts\n\n");
        for c in &analysis.key_concepts {
            let _ = writeln!(out, "- {c}");
        }
    }
    out
}

fn render_plan(plan: &ResearchPlan) -> String {
    let mut out = format!(
        "# {}\n\n",
        plan.title.as_deref().unwrap_or("Research Plan")
    );
    for (i, task) in plan.sections.iter().enumerate() {
        let _ = writeln!(out, "{}. **{}** ({})", i + 1, task.title, task.priority);
        if !task.description.is_empty() {
            let _ = writeln!(out, "   {}", task.description);
        }
    }
    out
}

/// Build the directory tree for a set of files. Directories sort before
/// files; siblings sort by name.
pub fn build_tree(files: &[GeneratedFile]) -> FileNode {
    let mut root = FileNode::directory("", "");
    for file in files {
        let parts: Vec<&str> = file.path.split('/').filter(|p| !p.is_empty()).collect();
        insert(&mut root, &parts, file);
    }
    finish(&mut root);
    root
}

fn insert(node: &mut FileNode, parts: &[&str], file: &GeneratedFile) {
    match parts {
        [] => {}
        [name] => node.children.push(FileNode {
            name: name.to_string(),
            path: file.path.clone(),
            kind: NodeKind::File,
            children: Vec::new(),
            size: file.size,
        }),
        [dir, rest @ ..] => {
            let pos = node
                .children
                .iter()
                .position(|c| c.kind == NodeKind::Directory && c.name == *dir);
            let pos = match pos {
                Some(pos) => pos,
                None => {
                    let path = if node.path.is_empty() {
                        dir.to_string()
                    } else {
                        format!("{}/{}", node.path, dir)
                    };
                    node.children.push(FileNode::directory(dir, &path));
                    node.children.len() - 1
                }
            };
            insert(&mut node.children[pos], rest, file);
        }
    }
}

fn finish(node: &mut FileNode) -> usize {
    if node.kind == NodeKind::File {
        return node.size;
    }
    node.children.sort_by(|a, b| {
        (a.kind == NodeKind::File, &a.name).cmp(&(b.kind == NodeKind::File, &b.name))
    });
    node.size = node.children.iter_mut().map(finish).sum();
    node.size
}

/// Look up a single projected file by its relative path.
pub fn find_file<'a>(files: &'a [GeneratedFile], path: &str) -> Option<&'a GeneratedFile> {
    let path = path.trim_start_matches("./");
    files.iter().find(|f| f.path == path)
}

/// Materialize files under `dir`, returning the absolute paths written.
pub fn write_files(dir: &Path, files: &[GeneratedFile]) -> std::io::Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(files.len());
    for file in files {
        let target = file
            .path
            .split('/')
            .fold(dir.to_path_buf(), |acc, part| acc.join(part));
        persistence::atomic_write(&target, file.content.as_bytes())?;
        written.push(target);
    }
    Ok(written)
}

/// Lowercase, dash-separated file name stem for a section title.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug: String = slug.chars().take(48).collect();
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::state::{ContentSection, Priority, ResearchTask};
    use tempfile::TempDir;

    fn populated_state() -> ResearchState {
        let mut state = ResearchState::new("What is photosynthesis?", "s1", "u1");
        state.analysis = Some(QuestionAnalysis {
            topic: "Photosynthesis".into(),
            scope: "plant biology".into(),
            sub_questions: vec!["Where does it happen?".into()],
            key_concepts: vec!["chlorophyll".into()],
        });
        state.plan = Some(ResearchPlan {
            title: Some("Photosynthesis".into()),
            sections: vec![
                ResearchTask {
                    title: "Overview".into(),
                    description: "What it is".into(),
                    priority: Priority::High,
                },
                ResearchTask {
                    title: "Light & Dark Reactions".into(),
                    description: String::new(),
                    priority: Priority::Medium,
                },
            ],
        });
        state.generated_content = vec![
            ContentSection::new(1, "Light & Dark Reactions", "Two stages."),
            ContentSection::new(0, "Overview", "Plants make sugar."),
        ];
        state
    }

    #[test]
    fn test_projection_paths_in_order() {
        let files = project_files(&populated_state());
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "analysis.md",
                "plan.md",
                "sections/01-overview.md",
                "sections/02-light-dark-reactions.md",
            ]
        );
        assert!(files.iter().all(|f| f.size == f.content.len()));
        assert!(files[1].content.contains("1. **Overview** (high)"));
    }

    #[test]
    fn test_fresh_state_projects_nothing() {
        assert!(project_files(&ResearchState::new("q", "s", "u")).is_empty());
    }

    #[test]
    fn test_report_file_when_completed() {
        let mut state = populated_state();
        state.final_report = Some("# Report".into());
        let files = project_files(&state);
        let report = find_file(&files, "report.md").unwrap();
        assert_eq!(report.kind, FileKind::Report);
    }

    #[test]
    fn test_tree_groups_sections_directory() {
        let files = project_files(&populated_state());
        let tree = build_tree(&files);
        assert_eq!(tree.kind, NodeKind::Directory);
        assert_eq!(tree.file_count(), 4);
        // directories first
        assert_eq!(tree.children[0].name, "sections");
        assert_eq!(tree.children[0].path, "sections");
        assert_eq!(tree.children[0].children.len(), 2);
        assert_eq!(
            tree.size,
            files.iter().map(|f| f.size).sum::<usize>()
        );
    }

    #[test]
    fn test_write_files_materializes_tree() {
        let dir = TempDir::new().unwrap();
        let files = project_files(&populated_state());
        let written = write_files(dir.path(), &files).unwrap();
        assert_eq!(written.len(), 4);
        let body =
            std::fs::read_to_string(dir.path().join("sections").join("01-overview.md")).unwrap();
        assert!(body.starts_with("# Overview"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Light & Dark Reactions"), "light-dark-reactions");
        assert_eq!(slugify("  Überblick: Grundlagen "), "überblick-grundlagen");
        assert_eq!(slugify("???"), "section");
        assert!(slugify(&"word ".repeat(40)).len() <= 48);
    }
}
