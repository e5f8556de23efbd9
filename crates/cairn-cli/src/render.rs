//! Text rendering of session state for the console
//!
//! Lines are shown 1-based; the core is 0-based throughout.

use cairn_core::{Breakpoint, Frame, StopReason, Variable};
use cairn_session::{SessionEvent, Watch};

pub fn breakpoint(bp: &Breakpoint) -> String {
    let mut text = format!("{}:{}", bp.path, bp.line + 1);
    if let Some(actual) = &bp.actual {
        if actual.path != bp.path || actual.line != bp.line {
            text.push_str(&format!(" (bound at {}:{})", actual.path, actual.line + 1));
        }
    }
    if let Some(condition) = bp.effective_condition() {
        text.push_str(&format!(" if {}", condition));
    }
    if let Some(count) = bp.effective_ignore_count() {
        text.push_str(&format!(" ignore {}", count));
    }
    if !bp.enabled {
        text.push_str(" [disabled]");
    }
    if let Some(error) = &bp.error {
        text.push_str(&format!(" [unresolved: {}]", error));
    }
    text
}

pub fn frame(frame: &Frame, active: bool) -> String {
    format!(
        "{} #{} {} at {}:{}",
        if active { "*" } else { " " },
        frame.index,
        frame.name,
        frame.path,
        frame.line + 1
    )
}

pub fn variable(var: &Variable) -> String {
    if let Some(error) = &var.error {
        return format!("{} = <error: {}>", var.name, error);
    }
    match &var.type_name {
        Some(type_name) => format!("{}: {} = {}", var.name, type_name, var.value),
        None => format!("{} = {}", var.name, var.value),
    }
}

pub fn watch(watch: &Watch) -> String {
    match &watch.value {
        Some(value) => format!("[{}] {}", watch.id, variable(value)),
        None => format!("[{}] {} = <not evaluated>", watch.id, watch.expression),
    }
}

fn stop_reason(reason: &StopReason) -> &str {
    match reason {
        StopReason::Breakpoint => "breakpoint",
        StopReason::Step => "step",
        StopReason::Pause => "pause",
        StopReason::Exception => "exception",
        StopReason::Entry => "entry",
        StopReason::Other(label) => label.as_str(),
    }
}

/// One console line for an event, or `None` for events the console does
/// not announce (decorations already show frame activation).
pub fn event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Attached {
            breakpoints,
            failed,
        } => Some(format!(
            "attached: {} breakpoint(s) bound, {} unresolved",
            breakpoints.len(),
            failed.len()
        )),
        SessionEvent::Stopped {
            reason, message, ..
        } => Some(match message {
            Some(message) => format!("stopped ({}): {}", stop_reason(reason), message),
            None => format!("stopped ({})", stop_reason(reason)),
        }),
        SessionEvent::BreakpointFailed { breakpoint: bp, reason } => Some(format!(
            "breakpoint {}:{} not bound: {}",
            bp.path,
            bp.line + 1,
            reason
        )),
        SessionEvent::VariableEditFailed {
            previous, error, ..
        } => Some(format!("could not set {}: {}", previous.name, error)),
        SessionEvent::WatchesChanged(watches) if !watches.is_empty() => {
            Some(watches.iter().map(watch).collect::<Vec<_>>().join("\n"))
        }
        SessionEvent::Output { text, .. } => Some(text.trim_end().to_string()),
        SessionEvent::ConnectionSuspended { reason } => Some(format!("connection suspended: {}", reason)),
        SessionEvent::Reconnected => Some("reconnected".to_string()),
        SessionEvent::Error { message } => Some(format!("error: {}", message)),
        SessionEvent::Detached { reason } => Some(format!("detached: {}", reason)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::Location;

    #[test]
    fn test_breakpoint_shows_one_based_lines() {
        let bp = Breakpoint::new("/a.js", 4)
            .with_condition("x")
            .with_actual(Location::new("/a.js", 6));
        assert_eq!(breakpoint(&bp), "/a.js:5 (bound at /a.js:7) if x");

        let mut failed = Breakpoint::new("/a.js", 0).disabled();
        failed.error = Some("no code".to_string());
        assert_eq!(breakpoint(&failed), "/a.js:1 [disabled] [unresolved: no code]");
    }

    #[test]
    fn test_events_worth_announcing() {
        let stopped = SessionEvent::Stopped {
            reason: StopReason::Exception,
            message: Some("TypeError".to_string()),
            frames: Vec::new(),
        };
        assert_eq!(event(&stopped).as_deref(), Some("stopped (exception): TypeError"));
        assert_eq!(event(&SessionEvent::WatchesChanged(Vec::new())), None);
        assert_eq!(
            event(&SessionEvent::Detached {
                reason: "killed".to_string()
            })
            .as_deref(),
            Some("detached: killed")
        );
    }
}
