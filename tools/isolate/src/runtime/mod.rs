use crate::errors::IsolateError;
use crate::types::ChildExit;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[cfg(unix)]
mod fork;

#[cfg(unix)]
pub use fork::ForkHost;

pub const CHILD_PANIC_EXIT: i32 = 255;

pub type ChildBody<'a> = &'a mut dyn FnMut(&mut dyn Write) -> i32;

pub trait ProcessHost: Send + Sync {
    fn spawn(&self, body: ChildBody<'_>) -> Result<Box<dyn IsolatedChild>, IsolateError>;
}

pub trait IsolatedChild {
    fn id(&self) -> u32;
    fn read_chunk(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, IsolateError>;
    fn wait(&mut self) -> Result<ChildExit, IsolateError>;
    fn kill(&mut self) -> Result<(), IsolateError>;
}

pub(crate) fn run_body(body: ChildBody<'_>, channel: &mut dyn Write) -> i32 {
    panic::catch_unwind(AssertUnwindSafe(|| body(channel))).unwrap_or(CHILD_PANIC_EXIT)
}

#[derive(Default, Clone)]
pub struct FakeHost {
    fail_next: Arc<Mutex<Option<String>>>,
    fail_wait: Arc<Mutex<Option<String>>>,
    replace_output: Arc<Mutex<Option<Vec<u8>>>>,
    stall: Arc<Mutex<bool>>,
    chunk_size: Option<usize>,
    spawned: Arc<Mutex<u32>>,
    kills: Arc<Mutex<Vec<u32>>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn set_fail_next(&self, message: &str) {
        *self.fail_next.lock().expect("fail lock") = Some(message.to_string());
    }

    pub fn set_fail_wait(&self, message: &str) {
        *self.fail_wait.lock().expect("fail wait lock") = Some(message.to_string());
    }

    pub fn set_replace_output(&self, bytes: Vec<u8>) {
        *self.replace_output.lock().expect("replace lock") = Some(bytes);
    }

    pub fn set_stall(&self, stall: bool) {
        *self.stall.lock().expect("stall lock") = stall;
    }

    pub fn spawned(&self) -> u32 {
        *self.spawned.lock().expect("spawned lock")
    }

    pub fn kills(&self) -> Vec<u32> {
        self.kills.lock().expect("kills lock").clone()
    }
}

impl ProcessHost for FakeHost {
    fn spawn(&self, body: ChildBody<'_>) -> Result<Box<dyn IsolatedChild>, IsolateError> {
        if let Some(message) = self.fail_next.lock().expect("fail lock").take() {
            return Err(IsolateError::Spawn(message));
        }
        let id = {
            let mut spawned = self.spawned.lock().expect("spawned lock");
            *spawned += 1;
            *spawned
        };
        let stalled = std::mem::take(&mut *self.stall.lock().expect("stall lock"));
        let wait_error = self.fail_wait.lock().expect("fail wait lock").take();
        if stalled {
            return Ok(Box::new(FakeChild {
                id,
                output: Vec::new(),
                cursor: 0,
                exit: ChildExit::Signaled(9),
                chunk_size: self.chunk_size,
                stalled: true,
                wait_error,
                kills: Arc::clone(&self.kills),
            }));
        }
        let mut output = Vec::new();
        let code = run_body(body, &mut output);
        if let Some(replacement) = self.replace_output.lock().expect("replace lock").take() {
            output = replacement;
        }
        Ok(Box::new(FakeChild {
            id,
            output,
            cursor: 0,
            exit: ChildExit::Exited(code),
            chunk_size: self.chunk_size,
            stalled: false,
            wait_error,
            kills: Arc::clone(&self.kills),
        }))
    }
}

struct FakeChild {
    id: u32,
    output: Vec<u8>,
    cursor: usize,
    exit: ChildExit,
    chunk_size: Option<usize>,
    stalled: bool,
    wait_error: Option<String>,
    kills: Arc<Mutex<Vec<u32>>>,
}

impl IsolatedChild for FakeChild {
    fn id(&self) -> u32 {
        self.id
    }

    fn read_chunk(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, IsolateError> {
        if self.stalled {
            return match timeout {
                Some(timeout) => Err(IsolateError::Timeout(timeout.as_millis() as u64)),
                None => Err(IsolateError::Io(
                    "fake child stalled with no timeout configured".to_string(),
                )),
            };
        }
        let remaining = &self.output[self.cursor..];
        let limit = self.chunk_size.unwrap_or(buf.len()).min(buf.len());
        let n = remaining.len().min(limit);
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }

    fn wait(&mut self) -> Result<ChildExit, IsolateError> {
        match &self.wait_error {
            Some(message) => Err(IsolateError::Io(message.clone())),
            None => Ok(self.exit),
        }
    }

    fn kill(&mut self) -> Result<(), IsolateError> {
        self.kills.lock().expect("kills lock").push(self.id);
        self.stalled = false;
        Ok(())
    }
}
