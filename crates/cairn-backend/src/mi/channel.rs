//! Token-correlated MI command channel
//!
//! Commands go out as `<token><command>\n`; the `^` result record echoing
//! the token completes the request. Async, stream and unrecognized records
//! are fanned out to subscribers in arrival order.

use super::record::{MiRecord, ResultClass, ResultRecord};
use crate::link::{BoxReader, Link};
use crate::subscribers::Subscribers;
use crate::transport::{LinkStatus, Streams};
use crate::{Error, Result};
use cairn_config::ConnectionConfig;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Longest MI line accepted. The debuggee can share the terminal, so a
/// runaway line is dropped as malformed rather than buffered.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

pub struct MiChannel {
    link: Link<ResultRecord>,
    subscribers: Subscribers<MiRecord>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    max_parse_failures: u32,
}

impl MiChannel {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            link: Link::new(config.request_timeout_ms),
            subscribers: Subscribers::new(config.event_channel_capacity),
            reader_task: std::sync::Mutex::new(None),
            max_parse_failures: config.max_consecutive_parse_failures.max(1),
        }
    }

    pub async fn attach_streams(&self, streams: Streams) -> Result<()> {
        let Streams { reader, writer } = streams;
        let generation = self.link.attach_writer(writer).await?;
        let handle = tokio::spawn(read_loop(
            reader,
            generation,
            self.link.clone(),
            self.subscribers.clone(),
            self.max_parse_failures,
        ));
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
        Ok(())
    }

    /// Run a command and wait for its result record. `^error` becomes
    /// [`Error::Command`] carrying the backend's message.
    #[tracing::instrument(skip(self), fields(token))]
    pub async fn send_command(&self, command: &str) -> Result<ResultRecord> {
        let submitted = self.link.submit(|token| encode_command(token, command)).await?;
        tracing::Span::current().record("token", submitted.seq);

        let record = self.link.wait(command, submitted).await?;
        match record.class {
            ResultClass::Error => Err(Error::Command(record.error_message())),
            _ => Ok(record),
        }
    }

    /// Write a command whose result nobody waits for.
    pub async fn send_no_wait(&self, command: &str) -> Result<i64> {
        self.link.notify(|token| encode_command(token, command)).await
    }

    pub async fn subscribe_records(&self) -> mpsc::Receiver<MiRecord> {
        self.subscribers.subscribe().await
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.link.watch_status()
    }

    pub fn set_state(&self, state: crate::transport::ConnectionState) {
        self.link.set_state(state);
    }

    pub fn set_away(&self, away: bool) {
        self.link.set_away(away);
    }

    pub async fn pending_request_count(&self) -> usize {
        self.link.pending_count().await
    }

    pub async fn close(&self, reason: &str) {
        let failed = self.link.close(reason).await;
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        info!(failed, reason, "MI channel closed");
    }
}

impl Drop for MiChannel {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

fn encode_command(token: i64, command: &str) -> Result<Vec<u8>> {
    if command.contains('\n') {
        return Err(Error::Protocol(
            "MI commands must be a single line".to_string(),
        ));
    }
    trace!(token, command, "Sending MI command");
    Ok(format!("{}{}\n", token, command).into_bytes())
}

async fn read_loop(
    reader: BoxReader,
    generation: u64,
    link: Link<ResultRecord>,
    subscribers: Subscribers<MiRecord>,
    max_parse_failures: u32,
) {
    debug!(generation, "MI reader started");
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut failures = 0u32;

    let reason = loop {
        let parsed = match read_line(&mut reader, &mut line, MAX_LINE_LEN).await {
            Ok(LineRead::Eof) => break "backend closed the connection".to_string(),
            Ok(LineRead::Line) => {
                let text = String::from_utf8_lossy(&line);
                trace!("Received MI line: {}", text.trim_end());
                MiRecord::parse(&text)
            }
            Ok(LineRead::Oversized) => Err(Error::Protocol(format!(
                "line longer than {} bytes",
                MAX_LINE_LEN
            ))),
            Err(e) => break format!("read failed: {}", e),
        };

        match parsed {
            Ok(record) => {
                failures = 0;
                route(record, &link, &subscribers).await;
            }
            Err(e) => {
                failures += 1;
                warn!(failures, "Dropping malformed MI record: {}", e);
                if failures >= max_parse_failures {
                    break format!("{} consecutive malformed records", failures);
                }
            }
        }
    };

    info!("MI connection lost: {}", reason);
    link.connection_lost(generation, &reason).await;
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    Oversized,
}

/// Read one `\n`-terminated line into `line`, holding at most `max` bytes.
/// The tail of an oversized line is consumed and dropped.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>, max: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let limit = max as u64 + 1;
    line.clear();
    if (&mut *reader).take(limit).read_until(b'\n', line).await? == 0 {
        return Ok(LineRead::Eof);
    }
    if line.len() <= max || line.last() == Some(&b'\n') {
        return Ok(LineRead::Line);
    }
    loop {
        line.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', line).await?;
        if n == 0 || line.last() == Some(&b'\n') {
            break;
        }
    }
    line.clear();
    Ok(LineRead::Oversized)
}

async fn route(
    record: MiRecord,
    link: &Link<ResultRecord>,
    subscribers: &Subscribers<MiRecord>,
) {
    match record {
        MiRecord::Result(result) => match result.token {
            Some(token) => {
                if !link.complete(token, Ok(result)).await {
                    warn!(token, "Result for unknown token");
                }
            }
            None => debug!(class = ?result.class, "Untokened result record"),
        },
        MiRecord::Prompt => {}
        other => subscribers.publish(other).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::record::StreamKind;
    use std::time::Duration;
    use tokio::io::{AsyncWriteExt, DuplexStream};

    fn channel_with_server(config: &ConnectionConfig) -> (MiChannel, Streams, DuplexStream) {
        let (client, server) = tokio::io::duplex(8192);
        let (read, write) = tokio::io::split(client);
        (MiChannel::new(config), Streams::new(read, write), server)
    }

    /// Fake MI backend answering each command with the given result body.
    fn spawn_responder(server: DuplexStream, reply: &'static str) {
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let token: String = line.chars().take_while(char::is_ascii_digit).collect();
                let out = format!("{}{}\n(gdb) \n", token, reply);
                write.write_all(out.as_bytes()).await.unwrap();
            }
        });
    }

    #[tokio::test]
    async fn test_command_correlates_by_token() {
        let (channel, streams, server) = channel_with_server(&ConnectionConfig::default());
        channel.attach_streams(streams).await.unwrap();
        spawn_responder(server, "^done,value=\"7\"");

        let record = channel
            .send_command("-data-evaluate-expression x")
            .await
            .unwrap();
        assert_eq!(record.token, Some(1));
        assert_eq!(record.results.get_str("value"), Some("7"));
    }

    #[tokio::test]
    async fn test_error_record_becomes_command_error() {
        let (channel, streams, server) = channel_with_server(&ConnectionConfig::default());
        channel.attach_streams(streams).await.unwrap();
        spawn_responder(server, "^error,msg=\"No symbol table is loaded.\"");

        let err = channel.send_command("-stack-list-locals 1").await.unwrap_err();
        assert_eq!(err, Error::Command("No symbol table is loaded.".to_string()));
    }

    #[tokio::test]
    async fn test_async_and_stream_records_are_published() {
        let (channel, streams, mut server) = channel_with_server(&ConnectionConfig::default());
        channel.attach_streams(streams).await.unwrap();
        let mut records = channel.subscribe_records().await;

        server
            .write_all(b"=thread-created,id=\"1\"\n~\"hi\\n\"\nprogram text\n")
            .await
            .unwrap();

        let first = records.recv().await.unwrap();
        assert!(matches!(first, MiRecord::Async(ref a) if a.class == "thread-created"));
        assert_eq!(
            records.recv().await.unwrap(),
            MiRecord::Stream {
                kind: StreamKind::Console,
                text: "hi\n".to_string()
            }
        );
        assert_eq!(
            records.recv().await.unwrap(),
            MiRecord::Unrecognized("program text".to_string())
        );
    }

    #[tokio::test]
    async fn test_eof_ends_in_flight_commands() {
        let (channel, streams, server) = channel_with_server(&ConnectionConfig::default());
        channel.attach_streams(streams).await.unwrap();

        let (read, write) = tokio::io::split(server);
        let waiter = async { channel.send_command("-exec-continue").await };
        let closer = async move {
            let mut lines = BufReader::new(read).lines();
            lines.next_line().await.unwrap();
            drop(lines);
            drop(write);
        };
        let (result, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(2), waiter),
            closer
        );
        assert!(matches!(result.unwrap(), Err(Error::SessionEnded(_))));
        assert!(!channel.status().is_connected());
    }

    #[tokio::test]
    async fn test_oversized_line_is_dropped_whole() {
        let mut input: &[u8] = b"^done\nxxxxxxxxxxxxxxxxxxxxxxxxx\n*stopped\npartial";
        let mut line = Vec::new();

        assert_eq!(read_line(&mut input, &mut line, 8).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"^done\n");
        assert_eq!(
            read_line(&mut input, &mut line, 8).await.unwrap(),
            LineRead::Oversized
        );
        assert!(line.is_empty());
        assert_eq!(read_line(&mut input, &mut line, 8).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"*stopped\n");
        assert_eq!(read_line(&mut input, &mut line, 8).await.unwrap(), LineRead::Line);
        assert_eq!(line, b"partial");
        assert_eq!(read_line(&mut input, &mut line, 8).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn test_oversized_lines_count_as_parse_failures() {
        let config = ConnectionConfig {
            max_consecutive_parse_failures: 2,
            ..ConnectionConfig::default()
        };
        let (channel, streams, mut server) = channel_with_server(&config);
        channel.attach_streams(streams).await.unwrap();

        let long = vec![b'~'; MAX_LINE_LEN + 10];
        for _ in 0..2 {
            server.write_all(&long).await.unwrap();
            server.write_all(b"\n").await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while channel.status().is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let last_error = channel.status().last_error.unwrap();
        assert!(last_error.contains("malformed"), "{}", last_error);
    }

    #[tokio::test]
    async fn test_multiline_command_is_rejected() {
        let channel = MiChannel::new(&ConnectionConfig::default());
        assert!(matches!(
            channel.send_no_wait("-exec-run\n-exec-next").await,
            Err(Error::Protocol(_))
        ));
    }
}
