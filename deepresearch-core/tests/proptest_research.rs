//! Property-based tests for research state invariants using proptest.

use proptest::prelude::*;

use deepresearch_core::config::ProgressModel;
use deepresearch_core::research::files::{build_tree, project_files, slugify};
use deepresearch_core::research::{
    ContentSection, Priority, ResearchPlan, ResearchState, ResearchStatus, ResearchTask,
    StateDelta,
};

fn planned_state(sections: usize) -> ResearchState {
    let mut state = ResearchState::new("What is photosynthesis?", "s1", "u1");
    state.mark_started();
    state.apply(StateDelta {
        status: Some(ResearchStatus::Executing),
        progress: Some(40.0),
        plan: Some(ResearchPlan {
            title: None,
            sections: (0..sections)
                .map(|i| ResearchTask {
                    title: format!("Section {i}"),
                    description: String::new(),
                    priority: Priority::Medium,
                })
                .collect(),
        }),
        ..Default::default()
    });
    state
}

// --- Progress properties ---

proptest! {
    #[test]
    fn progress_never_decreases(updates in prop::collection::vec(-50.0f64..150.0, 1..40)) {
        let mut state = planned_state(3);
        let mut last = state.progress;
        for p in updates {
            state.apply(StateDelta { progress: Some(p), ..Default::default() });
            prop_assert!(state.progress >= last);
            prop_assert!(state.progress <= 99.0);
            last = state.progress;
        }
    }

    #[test]
    fn progress_is_100_only_when_completed(updates in prop::collection::vec(0.0f64..=100.0, 0..10)) {
        let mut state = planned_state(2);
        for p in updates {
            state.apply(StateDelta { progress: Some(p), ..Default::default() });
            prop_assert!(state.progress < 100.0);
        }
        state.apply(StateDelta {
            status: Some(ResearchStatus::Completed),
            ..Default::default()
        });
        prop_assert_eq!(state.progress, 100.0);
    }

    #[test]
    fn section_progress_is_monotonic(total in 1usize..30) {
        let model = ProgressModel::default();
        let mut last = model.planned;
        for completed in 1..=total {
            let p = model.for_sections(completed, total);
            prop_assert!(p > last);
            last = p;
        }
        prop_assert_eq!(last, model.sections_done);
    }
}

// --- Section bookkeeping properties ---

proptest! {
    #[test]
    fn next_section_is_lowest_missing(
        total in 1usize..12,
        done in prop::collection::vec(0usize..12, 0..20),
    ) {
        let mut state = planned_state(total);
        for index in &done {
            state.apply(StateDelta {
                content: vec![ContentSection::new(*index, "t", "body")],
                ..Default::default()
            });
        }
        let expected = (0..total).find(|i| !done.contains(i));
        prop_assert_eq!(state.next_section_index(), expected);
    }

    #[test]
    fn section_indices_stay_unique_and_in_plan(
        total in 1usize..10,
        attempts in prop::collection::vec(0usize..15, 0..40),
    ) {
        let mut state = planned_state(total);
        for index in attempts {
            state.apply(StateDelta {
                content: vec![ContentSection::new(index, "t", "body")],
                ..Default::default()
            });
        }
        let mut seen = std::collections::HashSet::new();
        for section in &state.generated_content {
            prop_assert!(section.section_index < total);
            prop_assert!(seen.insert(section.section_index));
        }
        prop_assert!(state.completed_sections() <= total);
    }

    #[test]
    fn projected_tree_covers_every_file(total in 1usize..10) {
        let mut state = planned_state(total);
        for i in (0..total).rev() {
            state.apply(StateDelta {
                content: vec![ContentSection::new(i, format!("Part {i}"), "body")],
                ..Default::default()
            });
        }
        let files = project_files(&state);
        prop_assert_eq!(files.len(), total + 1);
        prop_assert_eq!(build_tree(&files).file_count(), files.len());
    }

    #[test]
    fn slug_is_filesystem_safe(title in "\\PC{0,80}") {
        let slug = slugify(&title);
        prop_assert!(!slug.is_empty());
        prop_assert!(slug.chars().count() <= 48);
        prop_assert!(!slug.contains('/'));
        prop_assert!(!slug.starts_with('-') && !slug.ends_with('-'));
    }
}
