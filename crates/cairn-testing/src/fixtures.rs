//! Sample entities for tests

use cairn_config::{BackendKind, RunnerConfig};
use cairn_core::{Frame, Scope, Variable};

/// Attach configuration for a DAP backend on localhost.
pub fn runner() -> RunnerConfig {
    RunnerConfig::attach(BackendKind::Dap, "127.0.0.1", 9229)
}

/// `inner` in `/src/app.js` called from `main` in `/src/main.js`.
pub fn stack() -> Vec<Frame> {
    vec![
        Frame::new(100, 0, "inner", "/src/app.js", 12).with_source_id(1),
        Frame::new(101, 1, "main", "/src/main.js", 40).with_source_id(2),
    ]
}

/// The same stack one line further down in `inner`, with new handles.
pub fn stepped_stack() -> Vec<Frame> {
    vec![
        Frame::new(200, 0, "inner", "/src/app.js", 13).with_source_id(1),
        Frame::new(201, 1, "main", "/src/main.js", 40).with_source_id(2),
    ]
}

/// A local scope with reference `reference`.
pub fn locals(reference: i64) -> Scope {
    Scope::new(0, 0, "Locals", reference)
}

/// `count = 3` and an expandable `point` object with reference `child`.
pub fn local_variables(child: i64) -> Vec<Variable> {
    vec![
        Variable::new("count", "3").with_type("number"),
        Variable::new("point", "Point").with_reference(child),
    ]
}
