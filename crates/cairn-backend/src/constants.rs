//! Wire protocol constants
//!
//! Centralizes the command, event and reason strings used by the DAP and
//! MI adapters.

/// DAP events received from the backend
pub mod events {
    pub const INITIALIZED: &str = "initialized";
    pub const STOPPED: &str = "stopped";
    pub const CONTINUED: &str = "continued";
    pub const BREAKPOINT: &str = "breakpoint";
    pub const LOADED_SOURCE: &str = "loadedSource";
    pub const OUTPUT: &str = "output";
    /// Debug session ended
    pub const TERMINATED: &str = "terminated";
    /// Debuggee process exited
    pub const EXITED: &str = "exited";
}

/// DAP request commands
pub mod requests {
    pub const INITIALIZE: &str = "initialize";
    pub const ATTACH: &str = "attach";
    pub const CONFIGURATION_DONE: &str = "configurationDone";
    pub const DISCONNECT: &str = "disconnect";
    pub const SET_BREAKPOINTS: &str = "setBreakpoints";
    pub const SET_EXCEPTION_BREAKPOINTS: &str = "setExceptionBreakpoints";
    pub const LOADED_SOURCES: &str = "loadedSources";
    pub const STACK_TRACE: &str = "stackTrace";
    pub const SCOPES: &str = "scopes";
    pub const VARIABLES: &str = "variables";
    pub const EVALUATE: &str = "evaluate";
    pub const SET_VARIABLE: &str = "setVariable";
    pub const NEXT: &str = "next";
    pub const STEP_IN: &str = "stepIn";
    pub const STEP_OUT: &str = "stepOut";
    pub const CONTINUE: &str = "continue";
    pub const PAUSE: &str = "pause";
}

/// `reason` values of the DAP `breakpoint` and `loadedSource` events
pub mod change_reasons {
    pub const NEW: &str = "new";
    pub const CHANGED: &str = "changed";
    pub const REMOVED: &str = "removed";
}

/// Exception filter ids for `setExceptionBreakpoints`
pub mod exception_filters {
    pub const ALL: &str = "all";
    pub const UNCAUGHT: &str = "uncaught";
}

/// DAP fallbacks for optional fields
pub mod defaults {
    /// Thread used when no stop has reported one yet.
    pub const THREAD_ID: i64 = 1;
    /// Maximum stack depth requested per stackTrace.
    pub const STACK_LEVELS: i64 = 200;
}

/// GDB/MI commands
pub mod mi {
    pub const BREAK_INSERT: &str = "-break-insert";
    pub const BREAK_DELETE: &str = "-break-delete";
    pub const BREAK_CONDITION: &str = "-break-condition";
    pub const BREAK_AFTER: &str = "-break-after";
    pub const BREAK_ENABLE: &str = "-break-enable";
    pub const BREAK_DISABLE: &str = "-break-disable";
    pub const BREAK_LIST: &str = "-break-list";
    pub const THREAD_INFO: &str = "-thread-info";
    pub const STACK_LIST_FRAMES: &str = "-stack-list-frames";
    pub const STACK_LIST_ARGUMENTS: &str = "-stack-list-arguments";
    pub const STACK_LIST_LOCALS: &str = "-stack-list-locals";
    pub const VAR_CREATE: &str = "-var-create";
    pub const VAR_DELETE: &str = "-var-delete";
    pub const VAR_LIST_CHILDREN: &str = "-var-list-children";
    pub const VAR_ASSIGN: &str = "-var-assign";
    pub const DATA_EVALUATE: &str = "-data-evaluate-expression";
    pub const EXEC_RUN: &str = "-exec-run";
    pub const EXEC_CONTINUE: &str = "-exec-continue";
    pub const EXEC_NEXT: &str = "-exec-next";
    pub const EXEC_STEP: &str = "-exec-step";
    pub const EXEC_FINISH: &str = "-exec-finish";
    pub const EXEC_INTERRUPT: &str = "-exec-interrupt";
    pub const FILE_EXEC_AND_SYMBOLS: &str = "-file-exec-and-symbols";
    pub const GDB_SET: &str = "-gdb-set";
    pub const GDB_EXIT: &str = "-gdb-exit";

    /// Async record classes
    pub mod classes {
        pub const STOPPED: &str = "stopped";
        pub const RUNNING: &str = "running";
        pub const BREAKPOINT_CREATED: &str = "breakpoint-created";
        pub const BREAKPOINT_MODIFIED: &str = "breakpoint-modified";
        pub const BREAKPOINT_DELETED: &str = "breakpoint-deleted";
    }

    /// `reason` values of `*stopped`
    pub mod stop_reasons {
        pub const BREAKPOINT_HIT: &str = "breakpoint-hit";
        pub const END_STEPPING_RANGE: &str = "end-stepping-range";
        pub const FUNCTION_FINISHED: &str = "function-finished";
        pub const SIGNAL_RECEIVED: &str = "signal-received";
        pub const EXITED_NORMALLY: &str = "exited-normally";
        pub const EXITED: &str = "exited";
        pub const EXITED_SIGNALLED: &str = "exited-signalled";
    }

    /// Output categories assigned to MI stream records
    pub mod streams {
        pub const CONSOLE: &str = "console";
        pub const TARGET: &str = "stdout";
        pub const LOG: &str = "log";
    }
}
