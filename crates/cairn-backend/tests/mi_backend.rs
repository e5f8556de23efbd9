//! MiBackend against a scripted in-memory GDB.

use cairn_backend::{MiBackend, Streams};
use cairn_config::{BackendKind, ConnectionConfig, RunnerConfig};
use cairn_core::{Breakpoint, Error, PauseOnBreaks, StopReason};
use cairn_ports::{BackendEvent, DebugBackend, DetachReason};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

struct FakeGdb {
    commands: mpsc::UnboundedReceiver<String>,
    lines: mpsc::UnboundedSender<String>,
}

impl FakeGdb {
    fn start(server: DuplexStream) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (lines, mut line_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut input = BufReader::new(read).lines();
            loop {
                tokio::select! {
                    line = input.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        let token: String = line.chars().take_while(char::is_ascii_digit).collect();
                        let command = line[token.len()..].to_string();
                        let reply = format!("{}{}\n(gdb) \n", token, answer(&command));
                        let _ = command_tx.send(command);
                        if write.write_all(reply.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    pushed = line_rx.recv() => {
                        // None: the test hung up
                        let Some(pushed) = pushed else { break };
                        if write.write_all(format!("{}\n", pushed).as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { commands, lines }
    }

    fn push(&self, line: &str) {
        self.lines.send(line.to_string()).unwrap();
    }

    async fn expect(&mut self, prefix: &str) -> String {
        loop {
            let command = tokio::time::timeout(Duration::from_secs(2), self.commands.recv())
                .await
                .expect("gdb saw no command")
                .expect("gdb stopped");
            if command.starts_with(prefix) {
                return command;
            }
        }
    }
}

fn answer(command: &str) -> String {
    let name = command.split_whitespace().next().unwrap_or_default();
    match name {
        "-gdb-set" | "-file-exec-and-symbols" | "-break-delete" | "-break-condition"
        | "-break-after" | "-break-enable" | "-break-disable" | "-exec-interrupt" => {
            "^done".to_string()
        }
        "-break-insert" => {
            let location = command.rsplit(' ').next().unwrap_or_default().trim_matches('"');
            let (path, line) = location.rsplit_once(':').unwrap_or((location, "0"));
            format!(
                "^done,bkpt={{number=\"1\",type=\"breakpoint\",enabled=\"y\",file=\"{}\",fullname=\"{}\",line=\"{}\",times=\"0\"}}",
                path, path, line
            )
        }
        "-thread-info" => {
            "^done,threads=[{id=\"2\",target-id=\"Thread 2\"}],current-thread-id=\"2\"".to_string()
        }
        "-stack-list-frames" => concat!(
            "^done,stack=[",
            "frame={level=\"0\",addr=\"0x1\",func=\"inner\",file=\"a.c\",fullname=\"/src/a.c\",line=\"5\"},",
            "frame={level=\"1\",addr=\"0x2\",func=\"main\",file=\"main.c\",fullname=\"/src/main.c\",line=\"20\"}]"
        )
        .to_string(),
        "-stack-list-locals" => {
            "^done,locals=[{name=\"n\",type=\"int\",value=\"3\"},{name=\"p\",type=\"struct point\"}]"
                .to_string()
        }
        "-stack-list-arguments" => {
            "^done,stack-args=[frame={level=\"0\",args=[{name=\"argc\",type=\"int\",value=\"1\"}]}]"
                .to_string()
        }
        "-var-create" => {
            "^done,name=\"var1\",numchild=\"2\",value=\"{...}\",type=\"struct point\",has_more=\"0\""
                .to_string()
        }
        "-var-list-children" => concat!(
            "^done,numchild=\"2\",children=[",
            "child={name=\"var1.x\",exp=\"x\",numchild=\"0\",value=\"1\",type=\"int\"},",
            "child={name=\"var1.y\",exp=\"y\",numchild=\"0\",value=\"2\",type=\"int\"}],has_more=\"0\""
        )
        .to_string(),
        "-var-assign" => "^done,value=\"9\"".to_string(),
        "-var-delete" => "^done,ndeleted=\"1\"".to_string(),
        "-data-evaluate-expression" => "^done,value=\"42\"".to_string(),
        "-exec-run" | "-exec-continue" | "-exec-next" | "-exec-step" | "-exec-finish" => {
            "^running".to_string()
        }
        _ => "^error,msg=\"Undefined MI command\"".to_string(),
    }
}

async fn attached(runner: RunnerConfig) -> (MiBackend, FakeGdb) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (read, write) = tokio::io::split(client);
    let gdb = FakeGdb::start(server);
    let backend = MiBackend::new(ConnectionConfig {
        request_timeout_ms: 2_000,
        ..ConnectionConfig::default()
    });
    backend
        .attach_streams(Streams::new(read, write), &runner)
        .await
        .unwrap();
    (backend, gdb)
}

fn runner() -> RunnerConfig {
    RunnerConfig {
        program: Some("/src/app".to_string()),
        ..RunnerConfig::attach(BackendKind::Mi, "127.0.0.1", 2345)
    }
}

async fn next_event(events: &mut mpsc::Receiver<BackendEvent>) -> BackendEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no backend event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_attach_loads_program() {
    let (backend, mut gdb) = attached(runner()).await;
    assert_eq!(
        gdb.expect("-file-exec-and-symbols").await,
        "-file-exec-and-symbols \"/src/app\""
    );
    assert!(!backend.features().exception_breaks);
    assert_eq!(
        backend.set_break_behavior(PauseOnBreaks::All).await,
        Err(Error::Unsupported("breaking on exceptions".to_string()))
    );
    assert!(backend.set_break_behavior(PauseOnBreaks::None).await.is_ok());
}

#[tokio::test]
async fn test_breakpoint_insert_command_and_lines() {
    let (backend, mut gdb) = attached(runner()).await;

    let created = backend
        .set_breakpoint(
            &Breakpoint::new("/src/main.c", 11)
                .with_condition("x > 1")
                .with_ignore_count(2),
        )
        .await
        .unwrap();
    assert_eq!(
        gdb.expect("-break-insert").await,
        "-break-insert -f -c \"x > 1\" -i 2 \"/src/main.c:12\""
    );
    assert_eq!(created.id, Some(1));
    assert_eq!(created.actual.as_ref().map(|l| l.line), Some(11));

    let mut disabled = created.clone();
    disabled.enabled = false;
    backend.change_breakpoint(&disabled).await.unwrap();
    assert_eq!(gdb.expect("-break-disable").await, "-break-disable 1");

    backend.clear_breakpoint(&created).await.unwrap();
    assert_eq!(gdb.expect("-break-delete").await, "-break-delete 1");
}

#[tokio::test]
async fn test_stack_scopes_and_var_objects() {
    let (backend, mut gdb) = attached(runner()).await;

    let frames = backend.get_frames().await.unwrap();
    gdb.expect("-thread-info").await;
    assert_eq!(gdb.expect("-stack-list-frames").await, "-stack-list-frames --thread 2");
    assert_eq!(frames.len(), 2);
    assert_eq!((frames[0].name.as_str(), frames[0].line), ("inner", 4));

    let scopes = backend.get_scopes(&frames[0]).await.unwrap();
    assert_eq!(scopes.len(), 2);
    let locals = backend.get_properties(scopes[1].reference).await.unwrap();
    assert_eq!(
        gdb.expect("-stack-list-locals").await,
        "-stack-list-locals --thread 2 --frame 0 --simple-values"
    );
    assert_eq!(locals[0].value, "3");
    assert!(!locals[0].children);
    assert!(locals[1].children);
    gdb.expect("-var-create").await;

    let fields = backend
        .get_properties(locals[1].reference.unwrap())
        .await
        .unwrap();
    assert_eq!(
        gdb.expect("-var-list-children").await,
        "-var-list-children --simple-values \"var1\""
    );
    let names: Vec<_> = fields.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["x", "y"]);

    let assigned = backend
        .set_variable(locals[1].reference.unwrap(), "x", "9", Some(&frames[0]))
        .await
        .unwrap();
    assert_eq!(gdb.expect("-var-assign").await, "-var-assign \"var1.x\" \"9\"");
    assert_eq!(assigned.value, "9");

    // A new stop drops old references and var-objects
    backend.get_frames().await.unwrap();
    assert_eq!(gdb.expect("-var-delete").await, "-var-delete \"var1\"");
    assert!(matches!(
        backend.get_properties(scopes[1].reference).await,
        Err(Error::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_first_resume_runs_then_continues() {
    let (backend, mut gdb) = attached(runner()).await;
    backend.resume().await.unwrap();
    assert_eq!(gdb.expect("-exec-").await, "-exec-run");
    backend.resume().await.unwrap();
    assert_eq!(gdb.expect("-exec-").await, "-exec-continue --thread 1");
}

#[tokio::test]
async fn test_async_records_become_events() {
    let (backend, gdb) = attached(runner()).await;
    let mut events = backend.subscribe().await;

    gdb.push("~\"Reading symbols\\n\"");
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::Output {
            category: "console".to_string(),
            text: "Reading symbols\n".to_string()
        }
    );

    gdb.push("*running,thread-id=\"all\"");
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::StateChange { running: true }
    );

    gdb.push("*stopped,reason=\"breakpoint-hit\",disp=\"keep\",bkptno=\"1\",thread-id=\"3\"");
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::Break {
            reason: StopReason::Breakpoint,
            thread_id: Some(3),
            hit_breakpoints: vec![1],
        }
    );

    gdb.push("*stopped,reason=\"signal-received\",signal-name=\"SIGSEGV\",signal-meaning=\"Segmentation fault\"");
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::Exception {
            thread_id: None,
            message: "SIGSEGV: Segmentation fault".to_string()
        }
    );

    gdb.push("*stopped,reason=\"exited\",exit-code=\"010\"");
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::Detached {
            reason: DetachReason::Exited { code: Some(8) }
        }
    );
}

#[tokio::test]
async fn test_lost_pipe_without_reconnect_ends_session() {
    let (backend, gdb) = attached(RunnerConfig {
        reconnect: false,
        ..runner()
    })
    .await;
    let mut events = backend.subscribe().await;

    drop(gdb);
    assert_eq!(
        next_event(&mut events).await,
        BackendEvent::Detached {
            reason: DetachReason::Killed
        }
    );
}
