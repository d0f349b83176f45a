use super::{run_body, ChildBody, IsolatedChild, ProcessHost};
use crate::errors::IsolateError;
use crate::types::ChildExit;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

/// Spawns children with `fork(2)` and talks to them over a `pipe(2)`.
///
/// The child is a copy of the calling process; whatever it mutates dies with
/// it. It never returns into the caller's stack: after the body runs it
/// leaves through `_exit(2)`, so destructors and atexit handlers of the
/// parent image do not run twice.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForkHost;

impl ProcessHost for ForkHost {
    fn spawn(&self, body: ChildBody<'_>) -> Result<Box<dyn IsolatedChild>, IsolateError> {
        let (reader, writer) = pipe()?;
        // SAFETY: the child branch only runs `body` and then calls `_exit`.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(IsolateError::Spawn(io::Error::last_os_error().to_string())),
            0 => {
                drop(reader);
                let mut channel = File::from(writer);
                let code = run_body(body, &mut channel);
                let _ = channel.flush();
                drop(channel);
                // SAFETY: terminates the child without unwinding into the parent's frames.
                unsafe { libc::_exit(code) }
            }
            pid => {
                drop(writer);
                Ok(Box::new(ForkedChild {
                    pid,
                    channel: File::from(reader),
                    exit: None,
                }))
            }
        }
    }
}

fn pipe() -> Result<(OwnedFd, OwnedFd), IsolateError> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(IsolateError::Spawn(io::Error::last_os_error().to_string()));
    }
    // SAFETY: both descriptors were just created and are owned by nobody else.
    let (reader, writer) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(reader.as_raw_fd())?;
    set_cloexec(writer.as_raw_fd())?;
    Ok((reader, writer))
}

fn set_cloexec(fd: RawFd) -> Result<(), IsolateError> {
    // SAFETY: fcntl on a descriptor we own.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } == -1 {
        return Err(IsolateError::Spawn(io::Error::last_os_error().to_string()));
    }
    Ok(())
}

struct ForkedChild {
    pid: libc::pid_t,
    channel: File,
    exit: Option<ChildExit>,
}

impl IsolatedChild for ForkedChild {
    fn id(&self) -> u32 {
        self.pid as u32
    }

    fn read_chunk(
        &mut self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, IsolateError> {
        if let Some(timeout) = timeout {
            wait_readable(self.channel.as_raw_fd(), timeout)?;
        }
        loop {
            match self.channel.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IsolateError::Io(e.to_string())),
            }
        }
    }

    fn wait(&mut self) -> Result<ChildExit, IsolateError> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let mut status: libc::c_int = 0;
        loop {
            // SAFETY: waits on our own child; `status` is a valid out pointer.
            if unsafe { libc::waitpid(self.pid, &mut status, 0) } != -1 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(IsolateError::Io(format!("waitpid {}: {err}", self.pid)));
            }
        }
        let exit = if libc::WIFEXITED(status) {
            ChildExit::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            ChildExit::Signaled(libc::WTERMSIG(status))
        } else {
            ChildExit::Exited(-1)
        };
        self.exit = Some(exit);
        Ok(exit)
    }

    fn kill(&mut self) -> Result<(), IsolateError> {
        if self.exit.is_some() {
            return Ok(());
        }
        // SAFETY: signals our own, not yet reaped, child.
        if unsafe { libc::kill(self.pid, libc::SIGKILL) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(IsolateError::Io(format!("kill {}: {err}", self.pid)));
            }
        }
        Ok(())
    }
}

impl Drop for ForkedChild {
    fn drop(&mut self) {
        if self.exit.is_none() {
            let _ = self.kill();
            let _ = self.wait();
        }
    }
}

fn wait_readable(fd: RawFd, timeout: Duration) -> Result<(), IsolateError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let millis = remaining.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: one valid pollfd entry.
        match unsafe { libc::poll(&mut pollfd, 1, millis) } {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(IsolateError::Io(format!("poll: {err}")));
                }
            }
            0 => return Err(IsolateError::Timeout(timeout.as_millis() as u64)),
            // Readable or hung up; either way the next read will not block.
            _ => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_output_and_exit_code_reach_the_parent() {
        let mut body = |out: &mut dyn Write| {
            out.write_all(b"from child").expect("write");
            7
        };
        let mut child = ForkHost.spawn(&mut body).expect("fork");
        let mut collected = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = child.read_chunk(&mut buf, None).expect("read");
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"from child");
        assert_eq!(child.wait().expect("wait"), ChildExit::Exited(7));
    }

    #[test]
    fn hung_child_times_out_and_can_be_killed() {
        let mut body = |_: &mut dyn Write| {
            std::thread::sleep(Duration::from_secs(30));
            0
        };
        let mut child = ForkHost.spawn(&mut body).expect("fork");
        let mut buf = [0u8; 8];
        let err = child
            .read_chunk(&mut buf, Some(Duration::from_millis(50)))
            .expect_err("should time out");
        assert!(matches!(err, IsolateError::Timeout(50)));
        child.kill().expect("kill");
        assert_eq!(
            child.wait().expect("wait"),
            ChildExit::Signaled(libc::SIGKILL)
        );
    }
}
