//! Console loop driven by scripted input against the mock backend.

use cairn_cli::commands::debug::console;
use cairn_config::SessionConfig;
use cairn_session::Session;
use cairn_testing::{fixtures, MemoryBreakpointStore, MockBackend, RecordingDecorations};
use std::sync::Arc;

fn session(backend: Arc<MockBackend>) -> Session {
    Session::new(
        backend,
        Arc::new(RecordingDecorations::new()),
        Arc::new(MemoryBreakpointStore::new()),
        &SessionConfig::default(),
    )
}

async fn run(session: &Session, script: &str) -> String {
    let mut out = Vec::new();
    console(session, script.as_bytes(), &mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_breakpoint_commands_before_attach() {
    let session = session(Arc::new(MockBackend::new()));
    let out = run(
        &session,
        "b /src/app.js:13 if n > 1\nbl\nbogus\nd /src/app.js:13\nbl\n",
    )
    .await;

    assert!(out.contains("breakpoint at /src/app.js:13 if n > 1"), "{}", out);
    assert!(out.contains("  1  /src/app.js:13 if n > 1"), "{}", out);
    assert!(out.contains("unknown command 'bogus'"), "{}", out);
    assert!(out.contains("deleted /src/app.js:13"), "{}", out);
    assert!(out.contains("no breakpoints"), "{}", out);
    assert!(session.breakpoints().await.is_empty());
}

#[tokio::test]
async fn test_inspecting_a_stopped_session() {
    let backend = Arc::new(MockBackend::new().stopped_on_attach());
    backend.set_frames(fixtures::stack());
    backend.set_scopes(vec![fixtures::locals(5)]);
    backend.set_properties(5, fixtures::local_variables(9));
    backend.set_evaluation("count", "3");

    let session = session(backend.clone());
    session.attach(&fixtures::runner()).await.unwrap();

    let out = run(&session, "bt\nlocals\np count\np nope\nframe 1\nq\nbt\n").await;

    assert!(out.contains("* #0 inner at /src/app.js:13"), "{}", out);
    assert!(out.contains("  #1 main at /src/main.js:41"), "{}", out);
    assert!(out.contains("Locals:\n  count: number = 3"), "{}", out);
    assert!(out.contains("(cairn) count = 3"), "{}", out);
    assert!(out.contains("error: "), "{}", out);
    assert!(out.contains("* #1 main at /src/main.js:41"), "{}", out);
    // nothing after q runs
    assert_eq!(backend.call_count("frames"), 1);
    assert_eq!(out.matches("#0 inner").count(), 1);
}

#[tokio::test]
async fn test_stepping_requires_a_stop() {
    let backend = Arc::new(MockBackend::new());
    let session = session(backend.clone());
    session.attach(&fixtures::runner()).await.unwrap();

    let out = run(&session, "n\nbt\n").await;
    assert!(out.contains("error: "), "{}", out);
    assert!(out.contains("not stopped"), "{}", out);
    assert_eq!(backend.call_count("step"), 0);
}
