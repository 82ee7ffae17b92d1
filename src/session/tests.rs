use super::*;
use crate::model::{NodeParams, DEFAULT_MAC_SEED};
use crate::provision::HookRunner;
use std::sync::Mutex;

fn add_node(session: &mut Session, id: u32, server: &str) {
    session
        .topology
        .add_node(NodeParams {
            id,
            server: Some(server.to_string()),
            ..NodeParams::default()
        })
        .unwrap();
}

#[test]
fn test_new_session_starts_in_definition() {
    let session = Session::new(1, DEFAULT_MAC_SEED);
    assert_eq!(session.id(), 1);
    assert_eq!(session.state(), SessionState::Definition);
    assert!(session.topology.nodes().is_empty());
}

#[test]
fn test_transition_plan_walks_every_state() {
    let session = Session::new(1, DEFAULT_MAC_SEED);
    let plan = session
        .plan_transition(SessionState::Instantiation)
        .unwrap();
    assert_eq!(
        plan,
        vec![
            SessionState::Configuration,
            SessionState::Instantiation,
        ]
    );
}

#[test]
fn test_transition_to_current_state_is_empty_plan() {
    let session = Session::new(1, DEFAULT_MAC_SEED);
    let plan = session.plan_transition(SessionState::Definition).unwrap();
    assert!(plan.is_empty() || plan == vec![SessionState::Definition]);
}

#[test]
fn test_backward_transition_rejected() {
    let mut session = Session::new(1, DEFAULT_MAC_SEED);
    session.enter_state(SessionState::Runtime);
    assert!(matches!(
        session.plan_transition(SessionState::Instantiation),
        Err(SessionError::IllegalTransition { .. })
    ));
}

#[test]
fn test_entering_definition_resets_the_session() {
    let mut session = Session::new(1, DEFAULT_MAC_SEED);
    add_node(&mut session, 1, "");
    session.exec.submit(
        crate::exec::ExecPurpose::Shell,
        1,
        "uname -a".to_string(),
    );
    session.enter_state(SessionState::Runtime);

    session.enter_state(SessionState::Definition);
    assert!(session.topology.nodes().is_empty());
    assert_eq!(session.exec.pending_count(), 0);
}

#[test]
fn test_entering_shutdown_clears_topology() {
    let mut session = Session::new(1, DEFAULT_MAC_SEED);
    add_node(&mut session, 1, "");
    add_node(&mut session, 2, "");
    session
        .topology
        .apply_link(
            crate::model::LinkOp::Add,
            crate::model::LinkParams {
                node1: 1,
                node2: 2,
                ..crate::model::LinkParams::default()
            },
        )
        .unwrap();
    session.enter_state(SessionState::Runtime);

    session.enter_state(SessionState::Shutdown);
    assert!(session.topology.nodes().is_empty());
    assert!(session.topology.links().is_empty());
}

#[test]
fn test_deployment_guard_is_exclusive() {
    let session = Session::new(1, DEFAULT_MAC_SEED);
    let guard = session.begin_deployment().unwrap();
    assert!(matches!(
        session.begin_deployment(),
        Err(SessionError::DeploymentInProgress(1))
    ));
    drop(guard);
    // Released on drop; a new deployment may start.
    assert!(session.begin_deployment().is_ok());
}

#[test]
fn test_session_options() {
    let mut session = Session::new(1, DEFAULT_MAC_SEED);
    assert_eq!(session.option("controlnet"), None);
    session.set_option("controlnet", "172.16.0.0/24");
    assert_eq!(session.option("controlnet"), Some("172.16.0.0/24"));
    session.set_option("controlnet", "10.99.0.0/16");
    assert_eq!(session.option("controlnet"), Some("10.99.0.0/16"));
}

#[test]
fn test_server_names_deduplicated() {
    let mut session = Session::new(1, DEFAULT_MAC_SEED);
    add_node(&mut session, 1, "");
    add_node(&mut session, 2, "core2");
    add_node(&mut session, 3, "core2");
    add_node(&mut session, 4, "core3");
    assert_eq!(session.server_names(), vec!["", "core2", "core3"]);
}

struct RecordingRunner {
    runs: Mutex<Vec<(String, SessionState)>>,
    status: i32,
}

impl HookRunner for RecordingRunner {
    fn run(&self, script: &str, state: SessionState) -> i32 {
        self.runs
            .lock()
            .unwrap()
            .push((script.to_string(), state));
        self.status
    }
}

#[test]
fn test_hooks_run_only_for_their_state() {
    let mut session = Session::new(1, DEFAULT_MAC_SEED);
    session.add_hook(SessionState::Runtime, "runtime.sh", "echo runtime");
    session.add_hook(SessionState::Shutdown, "shutdown.sh", "echo shutdown");

    let runner = RecordingRunner {
        runs: Mutex::new(Vec::new()),
        status: 0,
    };
    session.run_hooks(SessionState::Runtime, &runner);

    let runs = runner.runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0], ("echo runtime".to_string(), SessionState::Runtime));
}

#[test]
fn test_failing_hook_does_not_block() {
    let mut session = Session::new(1, DEFAULT_MAC_SEED);
    session.add_hook(SessionState::Runtime, "bad.sh", "exit 1");
    let runner = RecordingRunner {
        runs: Mutex::new(Vec::new()),
        status: 1,
    };
    // Nonzero exit is logged, never propagated.
    session.run_hooks(SessionState::Runtime, &runner);
    assert_eq!(runner.runs.lock().unwrap().len(), 1);
}

#[test]
fn test_registry_create_get_destroy() {
    let mut registry = SessionRegistry::new(DEFAULT_MAC_SEED);
    assert!(registry.is_empty());

    let (id1, _) = registry.create();
    let (id2, _) = registry.create();
    assert_eq!(id1, 1);
    assert_eq!(id2, 2);
    assert_eq!(registry.len(), 2);

    assert!(registry.get(id1).is_ok());
    assert!(matches!(
        registry.get(99),
        Err(SessionError::NotFound(99))
    ));

    registry.destroy(id1).unwrap();
    assert!(registry.get(id1).is_err());
    // Ids are never reused.
    let (id3, _) = registry.create();
    assert_eq!(id3, 3);
}

#[tokio::test]
async fn test_registry_list() {
    let mut registry = SessionRegistry::new(DEFAULT_MAC_SEED);
    let (id, handle) = registry.create();
    {
        let mut session = handle.lock().await;
        session.name = Some("alpha".to_string());
        add_node(&mut session, 1, "");
        add_node(&mut session, 2, "");
    }

    let infos = registry.list().await;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].id, id);
    assert_eq!(infos[0].name.as_deref(), Some("alpha"));
    assert_eq!(infos[0].state, SessionState::Definition);
    assert_eq!(infos[0].node_count, 2);
}
