//! One isolation session: fork, capture in the child, replay in the parent.
//!
//! The parent blocks on the channel until the sentinel arrives (or the
//! optional timeout fires), reaps the child, replays every captured call in
//! order and finishes with a single outcome named after the session label
//! that passes only if the child exited cleanly.

use crate::codec::{self, Frame, FrameReader};
use crate::config::IsolateConfig;
use crate::errors::IsolateError;
use crate::interceptor::AssertionContext;
use crate::logging::JsonlLogger;
use crate::registry::OverrideRegistry;
use crate::replay::{self, ReplaySummary};
use crate::reporter::TestReporter;
use crate::runtime::{IsolatedChild, ProcessHost, CHILD_PANIC_EXIT};
use crate::types::{CallSite, ChildExit, DEFAULT_CALLER};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Exit code of a child whose closure returned an error.
pub const CHILD_ERROR_EXIT: i32 = 1;
pub const CHILD_ENCODE_EXIT: i32 = 254;

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub label: String,
    pub child_id: u32,
    pub exit: ChildExit,
    pub replay: ReplaySummary,
    pub passed: bool,
}

pub struct Isolator {
    host: Arc<dyn ProcessHost>,
    registry: OverrideRegistry,
    config: IsolateConfig,
    logger: Option<JsonlLogger>,
}

impl Isolator {
    /// Fork-backed isolator with the built-in library intercepted in `assert` and `main`.
    #[cfg(unix)]
    pub fn new(config: IsolateConfig) -> Self {
        Self::with_host(
            Arc::new(crate::runtime::ForkHost),
            OverrideRegistry::with_library(),
            config,
        )
    }

    pub fn with_host(
        host: Arc<dyn ProcessHost>,
        registry: OverrideRegistry,
        config: IsolateConfig,
    ) -> Self {
        let logger = JsonlLogger::from_config(&config.logging);
        Self {
            host,
            registry,
            config,
            logger,
        }
    }

    pub fn registry(&self) -> &OverrideRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut OverrideRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &IsolateConfig {
        &self.config
    }

    /// Runs `closure` in an isolated child and replays its assertions into `reporter`.
    ///
    /// Spawn failures are returned before anything is reported. If the
    /// child's message is lost (timeout, truncation, corruption) or the child
    /// cannot be reaped, whatever arrived is still replayed, the final outcome
    /// is reported as failed and the error is returned.
    #[track_caller]
    pub fn run<F>(
        &self,
        reporter: &mut dyn TestReporter,
        label: &str,
        closure: F,
    ) -> Result<SessionOutcome, IsolateError>
    where
        F: FnOnce(&mut AssertionContext<'_>) -> Result<(), IsolateError>,
    {
        let site = CallSite::here(DEFAULT_CALLER);
        self.log("info", "session_start", json!({ "label": label }));

        let registry = &self.registry;
        let mut closure = Some(closure);
        let mut body = |channel: &mut dyn Write| -> i32 {
            match closure.take() {
                Some(closure) => child_main(registry, closure, channel),
                None => CHILD_ENCODE_EXIT,
            }
        };
        let mut child = self.host.spawn(&mut body)?;
        let child_id = child.id();
        self.log(
            "info",
            "child_spawned",
            json!({ "label": label, "child_id": child_id }),
        );

        let started = Instant::now();
        let received = self.receive(child.as_mut());
        let mut reap_error = None;
        if let Err(IsolateError::Timeout(ms)) = &received {
            self.log(
                "warn",
                "child_timeout",
                json!({ "label": label, "child_id": child_id, "timeout_ms": ms }),
            );
            if let Err(err) = child.kill() {
                reap_error = Some(err);
            }
        }
        let exit = match child.wait() {
            Ok(exit) => exit,
            Err(err) => {
                self.log(
                    "error",
                    "reap_failed",
                    json!({ "label": label, "child_id": child_id, "error": err.to_string() }),
                );
                reporter.diag(&format!("isolated child '{label}' could not be reaped: {err}"));
                if reap_error.is_none() {
                    reap_error = Some(err);
                }
                ChildExit::Unreaped
            }
        };
        self.log(
            "info",
            "child_exited",
            json!({
                "label": label,
                "child_id": child_id,
                "exit": exit.to_string(),
                "elapsed_ms": started.elapsed().as_millis() as u64,
            }),
        );

        let records = received.and_then(|frame| {
            self.log(
                "info",
                "message_received",
                json!({
                    "label": label,
                    "bytes": frame.message.len(),
                    "discarded": frame.discarded,
                }),
            );
            self.save_capture(label, &frame.message);
            codec::decode(&frame.message)
        });

        let records = match records {
            Ok(records) => records,
            Err(err) => {
                self.log(
                    "error",
                    "decode_failed",
                    json!({ "label": label, "error": err.to_string() }),
                );
                reporter.diag(&format!(
                    "isolated child '{label}' did not deliver its results: {err}"
                ));
                reporter.report(false, label, &site);
                return Err(err);
            }
        };

        let replayed = replay::replay(
            &self.registry,
            reporter,
            &records,
            self.config.replay.on_error,
        );
        if let Err(err) = &replayed {
            self.log(
                "error",
                "replay_error",
                json!({ "label": label, "error": err.to_string() }),
            );
        }

        let passed = exit.success();
        if !passed {
            reporter.diag(&format!("isolated child '{label}' ended with {exit}"));
        }
        reporter.report(passed, label, &site);
        let summary = replayed?;
        if let Some(err) = reap_error {
            return Err(err);
        }

        for error in &summary.errors {
            self.log(
                "warn",
                "replay_error",
                json!({ "label": label, "error": error }),
            );
        }
        self.log(
            "info",
            "session_complete",
            json!({
                "label": label,
                "replayed": summary.replayed,
                "failed": summary.failed,
                "errors": summary.errors.len(),
                "passed": passed,
            }),
        );

        Ok(SessionOutcome {
            label: label.to_string(),
            child_id,
            exit,
            replay: summary,
            passed,
        })
    }

    fn receive(&self, child: &mut dyn IsolatedChild) -> Result<Frame, IsolateError> {
        let deadline = self.config.timeout().map(|timeout| Instant::now() + timeout);
        let mut frame = FrameReader::new();
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        while !frame.is_complete() {
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
            let n = child.read_chunk(&mut buf, remaining).map_err(|err| match err {
                IsolateError::Timeout(_) => {
                    IsolateError::Timeout(self.config.isolation.timeout_ms.unwrap_or_default())
                }
                other => other,
            })?;
            if n == 0 {
                break;
            }
            frame.feed(&buf[..n]);
        }
        frame.finish()
    }

    fn save_capture(&self, label: &str, message: &[u8]) {
        let Some(dir) = &self.config.isolation.capture_dir else {
            return;
        };
        let path = dir.join(capture_file_name(label));
        let saved = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, message));
        match saved {
            Ok(()) => self.log(
                "info",
                "capture_saved",
                json!({ "label": label, "path": path.display().to_string() }),
            ),
            Err(err) => self.log(
                "warn",
                "capture_failed",
                json!({ "label": label, "path": path.display().to_string(), "error": err.to_string() }),
            ),
        }
    }

    fn log(&self, level: &str, event_type: &str, payload: Value) {
        if let Some(logger) = &self.logger {
            logger.emit(level, event_type, payload);
        }
    }
}

fn child_main<F>(registry: &OverrideRegistry, closure: F, channel: &mut dyn Write) -> i32
where
    F: FnOnce(&mut AssertionContext<'_>) -> Result<(), IsolateError>,
{
    let mut ctx = AssertionContext::capturing(registry);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| closure(&mut ctx)));
    let code = match outcome {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            eprintln!("isolated closure returned an error: {err}");
            CHILD_ERROR_EXIT
        }
        Err(_) => CHILD_PANIC_EXIT,
    };
    let delivered = codec::encode(&ctx.take_pending()).and_then(|bytes| {
        channel
            .write_all(&bytes)
            .and_then(|_| channel.flush())
            .map_err(|e| IsolateError::Io(e.to_string()))
    });
    match delivered {
        Ok(()) => code,
        Err(err) => {
            eprintln!("isolated child could not deliver results: {err}");
            CHILD_ENCODE_EXIT
        }
    }
}

/// File name a session's raw message is saved under inside `capture_dir`.
pub fn capture_file_name(label: &str) -> String {
    let slug = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>();
    let digest = Sha256::digest(label.as_bytes());
    let suffix = digest[..4]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    format!("{slug}-{suffix}.msg")
}

#[cfg(unix)]
#[track_caller]
pub fn run_isolated<F>(
    reporter: &mut dyn TestReporter,
    label: &str,
    closure: F,
) -> Result<SessionOutcome, IsolateError>
where
    F: FnOnce(&mut AssertionContext<'_>) -> Result<(), IsolateError>,
{
    Isolator::new(IsolateConfig::default()).run(reporter, label, closure)
}
