// Copyright (c) The retest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Decoding a test process's output streams into events.
//!
//! Stdout carries one JSON event per line; stderr carries whatever the
//! harness or toolchain prints outside the protocol, which is recorded on the
//! [`Execution`] as protocol-level error lines. Both streams are drained to
//! EOF before the scan returns, interleaving reads as lines arrive.

use crate::{
    cancel::CancelHandle,
    errors::ScanError,
    events::{EventHandler, Execution, TestEvent},
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::debug;

/// Configuration for scanning one invocation's output streams.
pub struct ScanConfig<'a, O, E> {
    /// Which attempt round this invocation belongs to; 0 is the initial run.
    pub run_id: usize,

    /// The process's standard output, carrying the event stream.
    pub stdout: O,

    /// The process's standard error.
    pub stderr: E,

    /// Handlers invoked, in order, for every decoded event.
    pub handlers: Vec<&'a mut dyn EventHandler>,

    /// The shared execution aggregate events are applied to.
    pub execution: &'a mut Execution,

    /// The session's cancellation handle.
    pub cancel: CancelHandle,
}

/// Consumes both output streams until EOF, decoding stdout lines as events.
///
/// Each event is stamped with the configured run id, applied to the shared
/// execution, then dispatched to every handler in order. A stdout line that
/// is not a valid event is fatal. Returns [`ScanError::Cancelled`] if the
/// session is cancelled mid-scan.
pub async fn scan_test_output<O, E>(config: ScanConfig<'_, O, E>) -> Result<(), ScanError>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let ScanConfig {
        run_id,
        stdout,
        stderr,
        mut handlers,
        execution,
        mut cancel,
    } = config;

    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !(stdout_done && stderr_done) {
        tokio::select! {
            line = stdout_lines.next_line(), if !stdout_done => {
                match line.map_err(ScanError::Read)? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let mut event: TestEvent = serde_json::from_str(&line)
                            .map_err(|error| ScanError::Parse { line, error })?;
                        event.run_id = run_id;
                        execution.record_event(&event);
                        for handler in handlers.iter_mut() {
                            handler.event(&event, execution);
                        }
                    }
                    None => stdout_done = true,
                }
            }
            line = stderr_lines.next_line(), if !stderr_done => {
                match line.map_err(ScanError::Read)? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        debug!("test process stderr: {line}");
                        execution.add_error(line);
                    }
                    None => stderr_done = true,
                }
            }
            _ = cancel.cancelled() => return Err(ScanError::Cancelled),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::events::{TestAction, TestCase};
    use crate::recorder::FailureRecorder;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    /// Counts events seen, to stand in for a downstream consumer.
    #[derive(Default)]
    struct CountingHandler {
        seen: usize,
        last_run_id: usize,
    }

    impl EventHandler for CountingHandler {
        fn event(&mut self, event: &TestEvent, _execution: &Execution) {
            self.seen += 1;
            self.last_run_id = event.run_id;
        }
    }

    #[tokio::test]
    async fn decodes_events_and_dispatches_in_order() {
        let stdout = indoc! {r#"
            {"Action":"run","Package":"pkg","Test":"TestOne"}
            {"Action":"fail","Package":"pkg","Test":"TestOne","Elapsed":0.01}
            {"Action":"fail","Package":"pkg"}
        "#};
        let stderr = "warning: something odd\n";

        let source = CancelSource::new();
        let mut execution = Execution::new();
        let mut recorder = FailureRecorder::new();
        let mut counter = CountingHandler::default();

        scan_test_output(ScanConfig {
            run_id: 2,
            stdout: Cursor::new(stdout.as_bytes().to_vec()),
            stderr: Cursor::new(stderr.as_bytes().to_vec()),
            handlers: vec![&mut recorder, &mut counter],
            execution: &mut execution,
            cancel: source.handle(),
        })
        .await
        .unwrap();

        assert_eq!(recorder.failures(), &[TestCase::new("pkg", "TestOne")]);
        assert_eq!(counter.seen, 3);
        assert_eq!(counter.last_run_id, 2);
        assert_eq!(execution.errors(), &["warning: something odd".to_owned()]);
        assert_eq!(
            execution.failed(),
            vec![TestCase::new("pkg", "TestOne")]
        );
    }

    #[tokio::test]
    async fn malformed_stdout_is_fatal() {
        let source = CancelSource::new();
        let mut execution = Execution::new();

        let err = scan_test_output(ScanConfig {
            run_id: 1,
            stdout: Cursor::new(b"not json\n".to_vec()),
            stderr: Cursor::new(Vec::new()),
            handlers: vec![],
            execution: &mut execution,
            cancel: source.handle(),
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::Parse { .. }));
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_pending_read() {
        let (stdout_writer, stdout_reader) = tokio::io::duplex(64);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(64);

        let source = CancelSource::new();
        let handle = source.handle();
        source.cancel();

        let mut execution = Execution::new();
        let err = scan_test_output(ScanConfig {
            run_id: 1,
            stdout: stdout_reader,
            stderr: stderr_reader,
            handlers: vec![],
            execution: &mut execution,
            cancel: handle,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::Cancelled));

        // Keep the writers alive so the reads above stayed pending.
        drop(stdout_writer);
        drop(stderr_writer);
    }

    #[tokio::test]
    async fn unknown_actions_flow_through() {
        let source = CancelSource::new();
        let mut execution = Execution::new();
        let mut counter = CountingHandler::default();

        scan_test_output(ScanConfig {
            run_id: 1,
            stdout: Cursor::new(
                br#"{"Action":"build-output","Package":"pkg","Test":"TestOne"}"#.to_vec(),
            ),
            stderr: Cursor::new(Vec::new()),
            handlers: vec![&mut counter],
            execution: &mut execution,
            cancel: source.handle(),
        })
        .await
        .unwrap();

        assert_eq!(counter.seen, 1);
        assert!(execution.failed().is_empty());
    }

    #[test]
    fn action_other_is_distinct() {
        // Guard against the catch-all swallowing known actions.
        let event: TestEvent =
            serde_json::from_str(r#"{"Action":"fail","Package":"pkg","Test":"t"}"#).unwrap();
        assert_eq!(event.action, TestAction::Fail);
    }
}
