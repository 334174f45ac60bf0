//! End-to-end tests for the research workflow driven by scripted mocks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use deepresearch_core::capability::mock::MockProvider;
use deepresearch_core::config::ResearchConfig;
use deepresearch_core::error::WorkflowError;
use deepresearch_core::research::checkpoint::CheckpointStore;
use deepresearch_core::research::{Phase, ResearchCallback};
use deepresearch_core::{
    Brain, BrainSettings, CapabilityRegistry, DeepResearchError, FileCheckpointStore,
    InMemoryCheckpointStore, LlmProvider, MockLlmProvider, ProviderKind, ResearchEvent,
    ResearchStatus, ResearchWorkflow,
};

const ANALYSIS: &str = r#"{"topic": "Photosynthesis", "scope": "plant biology",
    "sub_questions": ["Where does it happen?"], "key_concepts": ["chlorophyll"]}"#;

fn plan_json(titles: &[&str]) -> String {
    let sections: Vec<serde_json::Value> = titles
        .iter()
        .map(|t| serde_json::json!({"title": t, "description": format!("About {t}")}))
        .collect();
    serde_json::json!({"title": "Photosynthesis", "sections": sections}).to_string()
}

struct Fixture {
    provider: Arc<MockLlmProvider>,
    store: Arc<InMemoryCheckpointStore>,
    workflow: ResearchWorkflow,
}

fn fixture_with(
    provider: MockLlmProvider,
    registry: CapabilityRegistry,
    config: ResearchConfig,
) -> Fixture {
    let provider = Arc::new(provider);
    let store = Arc::new(InMemoryCheckpointStore::new());
    let brain = Arc::new(Brain::new(
        provider.clone() as Arc<dyn LlmProvider>,
        BrainSettings::default(),
    ));
    let workflow = ResearchWorkflow::new(brain, Arc::new(registry), store.clone(), config);
    Fixture {
        provider,
        store,
        workflow,
    }
}

fn degraded_fixture() -> Fixture {
    fixture_with(
        MockLlmProvider::new(),
        CapabilityRegistry::new(Duration::from_secs(1)),
        ResearchConfig {
            report_summary: false,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_end_to_end_photosynthesis() {
    let search = Arc::new(MockProvider::search("Chlorophyll absorbs red and blue light."));
    let registry = CapabilityRegistry::new(Duration::from_secs(1)).with_provider(search.clone());
    let f = fixture_with(MockLlmProvider::new(), registry, ResearchConfig::default());

    f.provider.queue_text(ANALYSIS);
    f.provider.queue_text(&plan_json(&["Overview", "Mechanism"]));
    f.provider
        .queue_response(MockLlmProvider::tool_call_response(
            "web_search",
            serde_json::json!({"query": "photosynthesis overview"}),
        ));
    f.provider
        .queue_text("## Overview\nPlants turn light, water and CO2 into sugar.");
    f.provider
        .queue_text("## Mechanism\nLight-dependent reactions feed the Calvin cycle.");
    f.provider
        .queue_text("Photosynthesis converts light into chemical energy.");

    let mut run = f
        .workflow
        .start_streaming("What is photosynthesis?", "photo-1", "user-1")
        .await
        .unwrap();
    let mut events = Vec::new();
    while let Some(event) = run.next_event().await {
        events.push(event);
    }
    let state = run.join().await.unwrap();

    let progress: Vec<f64> = events.iter().map(ResearchEvent::progress).collect();
    assert_eq!(progress, vec![0.0, 20.0, 40.0, 60.0, 80.0, 80.0, 100.0]);
    let statuses: Vec<ResearchStatus> = events.iter().map(ResearchEvent::status).collect();
    assert_eq!(
        statuses,
        vec![
            ResearchStatus::Analyzing,
            ResearchStatus::Planning,
            ResearchStatus::Executing,
            ResearchStatus::Executing,
            ResearchStatus::Executing,
            ResearchStatus::Generating,
            ResearchStatus::Completed,
        ]
    );
    match &events[3] {
        ResearchEvent::Progress {
            phase,
            completed_sections,
            total_sections,
            delta,
            ..
        } => {
            assert_eq!(*phase, Phase::ResearchSection);
            assert_eq!((*completed_sections, *total_sections), (1, 2));
            assert_eq!(delta.content[0].section_index, 0);
        }
        other => panic!("expected progress event, got {other:?}"),
    }
    match events.last().unwrap() {
        ResearchEvent::Completed { files, tree, .. } => {
            assert!(files.iter().any(|f| f.path == "report.md"));
            assert_eq!(tree.file_count(), files.len());
        }
        other => panic!("expected completed event, got {other:?}"),
    }

    assert_eq!(state.status, ResearchStatus::Completed);
    assert_eq!(state.progress, 100.0);
    assert_eq!(state.generated_content.len(), 2);
    let report = state.final_report.as_deref().unwrap();
    assert!(report.contains("## 1. Overview"));
    assert!(report.contains("## 2. Mechanism"));
    assert_eq!(search.acquisition_count(), 1);
    assert_eq!(f.provider.call_count(), 6);

    let saved = f.store.load("photo-1").await.unwrap().unwrap();
    assert_eq!(saved, state);
    assert!(!f.workflow.is_running("photo-1"));
}

#[tokio::test]
async fn test_section_failure_then_resume_completes() {
    let f = degraded_fixture();
    f.provider.queue_text(ANALYSIS);
    f.provider.queue_text(&plan_json(&["A", "B", "C"]));
    f.provider.queue_text("Body of A");
    f.provider.queue_error(deepresearch_core::error::LlmError::AuthFailed {
        provider: "openai".into(),
    });

    let state = f.workflow.start("What is photosynthesis?", "s1", "u1").await.unwrap();
    assert_eq!(state.status, ResearchStatus::Error);
    assert_eq!(state.generated_content.len(), 1);
    assert_eq!(
        state.error.as_deref(),
        Some("ResearchSection failed: Authentication failed for provider openai")
    );
    assert!((state.progress - 160.0 / 3.0).abs() < 1e-9);

    f.provider.queue_text("Body of B");
    f.provider.queue_text("Body of C");
    let resumed = f.workflow.resume("s1").await.unwrap();
    assert_eq!(resumed.status, ResearchStatus::Completed);
    assert!(resumed.error.is_none());
    let indices: Vec<usize> = resumed
        .ordered_content()
        .iter()
        .map(|c| c.section_index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
    // analysis and plan were not regenerated
    assert_eq!(f.provider.call_count(), 6);
}

#[tokio::test]
async fn test_resume_completed_session_runs_nothing() {
    let f = degraded_fixture();
    f.provider.queue_text(ANALYSIS);
    f.provider.queue_text(&plan_json(&["Only"]));
    f.provider.queue_text("Only section");
    let done = f.workflow.start("q", "s1", "u1").await.unwrap();
    assert_eq!(done.status, ResearchStatus::Completed);
    let calls = f.provider.call_count();
    let saves = f.store.save_count();

    let mut run = f.workflow.resume_streaming("s1").await.unwrap();
    let first = run.next_event().await.unwrap();
    assert!(matches!(first, ResearchEvent::Completed { .. }));
    assert!(run.next_event().await.is_none());
    let state = run.join().await.unwrap();

    assert_eq!(state, done);
    assert_eq!(f.provider.call_count(), calls);
    assert_eq!(f.store.save_count(), saves);
}

#[tokio::test]
async fn test_degraded_mode_when_search_fails() {
    let search = Arc::new(MockProvider::new("search", ProviderKind::Search).failing("no key"));
    let registry = CapabilityRegistry::new(Duration::from_secs(1)).with_provider(search);
    let f = fixture_with(
        MockLlmProvider::new(),
        registry,
        ResearchConfig {
            report_summary: false,
            ..Default::default()
        },
    );
    f.provider.queue_text(ANALYSIS);
    f.provider.queue_text(&plan_json(&["Overview"]));
    f.provider.queue_text("Written without tools.");

    let state = f.workflow.start("q", "s1", "u1").await.unwrap();
    assert_eq!(state.status, ResearchStatus::Completed);
    assert_eq!(state.generated_content[0].content, "Written without tools.");
    assert!(f.provider.requests().iter().all(|r| r.tools.is_none()));
}

#[tokio::test]
async fn test_validation_failure_touches_nothing() {
    let search = Arc::new(MockProvider::search("unused"));
    let registry = CapabilityRegistry::new(Duration::from_secs(1)).with_provider(search.clone());
    let f = fixture_with(MockLlmProvider::new(), registry, ResearchConfig::default());

    for (q, s, u, field) in [
        ("", "s1", "u1", "question"),
        ("q", " ", "u1", "session_id"),
        ("q", "s1", "", "user_id"),
    ] {
        let err = f.workflow.start(q, s, u).await.unwrap_err();
        match err {
            DeepResearchError::Workflow(WorkflowError::EmptyField { field: got }) => {
                assert_eq!(got, field)
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(f.provider.call_count(), 0);
    assert_eq!(search.acquisition_count(), 0);
    assert_eq!(f.store.save_count(), 0);
}

#[tokio::test]
async fn test_second_run_for_same_session_is_busy() {
    let f = fixture_with(
        MockLlmProvider::new().with_delay(Duration::from_secs(5)),
        CapabilityRegistry::new(Duration::from_secs(1)),
        ResearchConfig::default(),
    );
    let mut run = f.workflow.start_streaming("q", "s1", "u1").await.unwrap();
    assert!(matches!(
        run.next_event().await,
        Some(ResearchEvent::SessionCreated { .. })
    ));
    assert!(f.workflow.is_running("s1"));

    let err = f.workflow.start("q", "s1", "u1").await.unwrap_err();
    assert!(matches!(
        err,
        DeepResearchError::Workflow(WorkflowError::SessionBusy { .. })
    ));
    let err = f.workflow.resume("s1").await.unwrap_err();
    assert!(matches!(
        err,
        DeepResearchError::Workflow(WorkflowError::SessionBusy { .. })
    ));

    run.cancel();
    assert!(run.join().await.is_err());
    assert!(!f.workflow.is_running("s1"));
}

fn file_workflow(dir: &std::path::Path, provider: MockLlmProvider) -> ResearchWorkflow {
    ResearchWorkflow::new(
        Arc::new(Brain::new(Arc::new(provider), BrainSettings::default())),
        Arc::new(CapabilityRegistry::new(Duration::from_secs(1))),
        Arc::new(FileCheckpointStore::new(dir)),
        ResearchConfig {
            report_summary: false,
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_separate_workflows_share_session_ownership_on_disk() {
    let dir = TempDir::new().unwrap();
    let owner = file_workflow(
        dir.path(),
        MockLlmProvider::new().with_delay(Duration::from_secs(5)),
    );
    let other_provider = MockLlmProvider::new();
    other_provider.queue_text(ANALYSIS);
    other_provider.queue_text(&plan_json(&["Overview"]));
    other_provider.queue_text("Overview body");
    let other = file_workflow(dir.path(), other_provider);

    let mut run = owner
        .start_streaming("What is photosynthesis?", "s1", "u1")
        .await
        .unwrap();
    assert!(matches!(
        run.next_event().await,
        Some(ResearchEvent::SessionCreated { .. })
    ));
    assert!(dir.path().join("s1.lock").exists());
    assert!(!other.is_running("s1"));

    let err = other.resume("s1").await.unwrap_err();
    assert!(matches!(
        err,
        DeepResearchError::Workflow(WorkflowError::SessionBusy { .. })
    ));
    let err = other.start("q", "s1", "u1").await.unwrap_err();
    assert!(matches!(
        err,
        DeepResearchError::Workflow(WorkflowError::SessionBusy { .. })
    ));
    assert_eq!(
        other.get_state("s1").await.unwrap().unwrap().status,
        ResearchStatus::Analyzing
    );

    run.cancel();
    assert!(run.join().await.is_err());
    assert!(!dir.path().join("s1.lock").exists());

    let state = other.resume("s1").await.unwrap();
    assert_eq!(state.status, ResearchStatus::Completed);
    assert_eq!(state.progress, 100.0);
    assert!(!dir.path().join("s1.lock").exists());
}

#[tokio::test]
async fn test_cancel_discards_in_flight_phase() {
    let f = fixture_with(
        MockLlmProvider::new().with_delay(Duration::from_secs(5)),
        CapabilityRegistry::new(Duration::from_secs(1)),
        ResearchConfig::default(),
    );
    let mut run = f.workflow.start_streaming("q", "s1", "u1").await.unwrap();
    run.next_event().await.unwrap();
    run.cancel();

    let err = run.join().await.unwrap_err();
    assert!(matches!(
        err,
        DeepResearchError::Workflow(WorkflowError::Cancelled { .. })
    ));
    let saved = f.store.load("s1").await.unwrap().unwrap();
    assert_eq!(saved.status, ResearchStatus::Analyzing);
    assert!(saved.analysis.is_none());
    assert_eq!(saved.progress, 0.0);
}

#[tokio::test]
async fn test_file_store_and_callback() {
    #[derive(Default)]
    struct Recorder(Mutex<Vec<f64>>);
    impl ResearchCallback for Recorder {
        fn on_event(&self, event: &ResearchEvent) {
            self.0.lock().unwrap().push(event.progress());
        }
    }

    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MockLlmProvider::new());
    provider.queue_text(ANALYSIS);
    provider.queue_text(&plan_json(&["Overview"]));
    provider.queue_text("Overview body");
    provider.queue_text("Summary.");
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(FileCheckpointStore::new(dir.path()));
    let workflow = ResearchWorkflow::new(
        Arc::new(Brain::new(provider, BrainSettings::default())),
        Arc::new(CapabilityRegistry::new(Duration::from_secs(1))),
        store.clone(),
        ResearchConfig::default(),
    )
    .with_callback(recorder.clone());

    let state = workflow.start("q", "file-1", "u1").await.unwrap();
    assert_eq!(state.status, ResearchStatus::Completed);
    assert!(dir.path().join("file-1.json").exists());
    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![0.0, 20.0, 40.0, 80.0, 80.0, 100.0]
    );

    let sessions = workflow.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].completed_sections, 1);
    let files = workflow.files("file-1").await.unwrap();
    let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["analysis.md", "plan.md", "sections/01-overview.md", "report.md"]
    );
}
