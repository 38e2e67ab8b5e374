//! Shared fixtures for the integration suites: an engine over a fake git
//! repository in a temp directory, with a no-sleep retry schedule.

use lumen_git::fake::FakeGit;
use lumenflow::config::{LumenConfig, RetryConfig};
use lumenflow::layout::Layout;
use lumenflow::lifecycle::{CreateRequest, Engine};
use lumenflow::model::{Exposure, Lane, Priority, WuId, WuType};
use lumenflow::spec_store::WriteMode;

/// A fresh engine over a fake repository. Keep the `TempDir` alive for the
/// duration of the test.
pub fn engine() -> (tempfile::TempDir, Engine<FakeGit>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let layout = Layout::new(dir.path());
    layout.ensure_dirs().expect("layout dirs");
    let git = FakeGit::new(dir.path());
    let config = LumenConfig {
        retry: RetryConfig {
            max_attempts: 4,
            base_ms: 0,
            max_ms: 0,
            multiplier: 1.0,
            jitter: 0.0,
        },
        ..LumenConfig::default()
    };
    let engine = Engine::new(dir.path(), config, git);
    (dir, engine)
}

/// A well-formed create request on the given lane.
pub fn create_request(id: Option<u64>, lane: &str, title: &str) -> CreateRequest {
    CreateRequest {
        id: id.map(WuId::from_number),
        lane: Lane::new(lane).expect("valid lane"),
        title: title.to_owned(),
        wu_type: WuType::Tooling,
        priority: Priority::P2,
        exposure: Exposure::BackendOnly,
        description: "Exercise the lifecycle end to end.".to_owned(),
        acceptance: vec!["the verbs run in order without drift".to_owned()],
        code_paths: vec![],
        spec_refs: vec![],
        initiative: None,
        phase: None,
        sizing: None,
        mode: WriteMode::Strict,
    }
}
