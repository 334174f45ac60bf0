//! Terminal rendering for events, sessions and file trees.

use deepresearch_core::ResearchEvent;
use deepresearch_core::research::{FileNode, NodeKind, ResearchState, SessionSummary};

/// One line describing an event, or `None` for events shown elsewhere.
pub fn event_line(event: &ResearchEvent) -> Option<String> {
    match event {
        ResearchEvent::SessionCreated {
            session_id,
            status,
            progress,
            resumed,
        } => {
            let verb = if *resumed { "Resuming" } else { "Started" };
            Some(format!(
                "{verb} session {session_id} ({status}, {})",
                percent(*progress)
            ))
        }
        ResearchEvent::Progress {
            phase,
            progress,
            completed_sections,
            total_sections,
            ..
        } => {
            let sections = if *total_sections > 0 {
                format!(" [{completed_sections}/{total_sections} sections]")
            } else {
                String::new()
            };
            Some(format!(
                "{} {phase} done{sections}",
                progress_bar(*progress)
            ))
        }
        ResearchEvent::Completed { files, .. } => Some(format!(
            "{} Report complete ({} files)",
            progress_bar(100.0),
            files.len()
        )),
        ResearchEvent::Error { phase, error, .. } => Some(match phase {
            Some(phase) => format!("Error during {phase}: {error}"),
            None => format!("Error: {error}"),
        }),
    }
}

pub fn percent(progress: f64) -> String {
    format!("{:.0}%", progress.clamp(0.0, 100.0))
}

/// A 20-cell bar followed by the percentage.
pub fn progress_bar(progress: f64) -> String {
    const WIDTH: usize = 20;
    let filled = ((progress.clamp(0.0, 100.0) / 100.0) * WIDTH as f64).round() as usize;
    format!(
        "[{}{}] {:>4}",
        "#".repeat(filled),
        "-".repeat(WIDTH - filled),
        percent(progress)
    )
}

pub fn session_status(state: &ResearchState) -> String {
    let mut out = format!(
        "Session:  {}\nUser:     {}\nQuestion: {}\nStatus:   {}\nProgress: {}\n",
        state.session_id,
        state.user_id,
        state.question,
        state.status,
        percent(state.progress)
    );
    if let Some(plan) = &state.plan {
        out.push_str(&format!(
            "Sections: {}/{}\n",
            state.completed_sections(),
            state.total_sections()
        ));
        for (index, task) in plan.sections.iter().enumerate() {
            let mark = if state.has_section(index) { "x" } else { " " };
            out.push_str(&format!("  [{mark}] {}. {}\n", index + 1, task.title));
        }
    }
    if let Some(error) = &state.error {
        out.push_str(&format!("Error:    {error}\n"));
    }
    out.push_str(&format!(
        "Updated:  {}\n",
        state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out
}

pub fn session_row(summary: &SessionSummary) -> String {
    let question = truncate(&summary.question, 50);
    format!(
        "{:<24} {:<10} {:>5}  {:>2}/{:<2}  {}  {}",
        summary.session_id,
        summary.status.to_string(),
        percent(summary.progress),
        summary.completed_sections,
        summary.total_sections,
        summary.updated_at.format("%Y-%m-%d %H:%M"),
        question
    )
}

/// Indented tree listing with sizes.
pub fn tree(node: &FileNode) -> String {
    let mut out = String::new();
    for child in &node.children {
        write_node(child, 0, &mut out);
    }
    out
}

fn write_node(node: &FileNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match node.kind {
        NodeKind::Directory => {
            out.push_str(&format!("{indent}{}/\n", node.name));
            for child in &node.children {
                write_node(child, depth + 1, out);
            }
        }
        NodeKind::File => {
            out.push_str(&format!("{indent}{} ({} bytes)\n", node.name, node.size));
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepresearch_core::research::Phase;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0.0), "[--------------------]   0%");
        assert_eq!(progress_bar(40.0), "[########------------]  40%");
        assert_eq!(progress_bar(100.0), "[####################] 100%");
        assert_eq!(progress_bar(250.0), "[####################] 100%");
    }

    #[test]
    fn test_session_created_line() {
        let event = ResearchEvent::SessionCreated {
            session_id: "s1".into(),
            status: deepresearch_core::ResearchStatus::Executing,
            progress: 60.0,
            resumed: true,
        };
        assert_eq!(
            event_line(&event).unwrap(),
            "Resuming session s1 (executing, 60%)"
        );
    }

    #[test]
    fn test_error_line_names_phase() {
        let state = ResearchState::new("q", "s1", "u1");
        let event = ResearchEvent::Error {
            session_id: "s1".into(),
            phase: Some(Phase::GeneratePlan),
            progress: 20.0,
            error: "GeneratePlan failed: empty plan".into(),
            state: Box::new(state),
        };
        assert_eq!(
            event_line(&event).unwrap(),
            "Error during GeneratePlan: GeneratePlan failed: empty plan"
        );
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_status_without_plan() {
        let state = ResearchState::new("What is RISC-V?", "s1", "ana");
        let out = session_status(&state);
        assert!(out.contains("Question: What is RISC-V?"));
        assert!(out.contains("Status:   idle"));
        assert!(!out.contains("Sections:"));
    }
}
