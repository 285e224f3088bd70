use super::stop;
use crate::Millis;
use crate::error::Error;
use crate::error::Result;
use std::os::fd::AsRawFd;
use std::os::fd::FromRawFd;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

const EXIT_CHECK_RETRIES: usize = 5;
const EXIT_CHECK_INTERVAL_MS: u64 = 2;

/// A bot subprocess behind a line-oriented pipe pair.
///
/// stderr is merged into stdout so chatter on either stream flows through
/// the same deadline-bounded reader. The child is placed in its own process
/// group (the whole tree dies on `SIGKILL`) and asks the kernel for
/// `SIGTERM` on parent death, so no orphans survive an arena crash.
#[derive(Debug)]
pub struct Channel {
    pid: libc::pid_t,
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
    buf: Vec<u8>,
    pos: usize,
    peak_rss_kb: i64,
}

impl Channel {
    /// Spawn `cmd` with an optional virtual-memory cap and extra
    /// environment entries on top of the inherited environment.
    pub fn spawn(cmd: &str, max_mem_bytes: i64, env: &[(String, String)]) -> Result<Self> {
        let args = split_command(cmd);
        let Some(program) = args.first() else {
            return Err(Error::System(format!("empty command: {cmd:?}")));
        };
        let program = if !program.contains('/') && Path::new(program).exists() {
            format!("./{program}")
        } else {
            program.clone()
        };

        // one pipe carries both of the child's output streams
        let mut fds = [0 as libc::c_int; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let read_end = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write_end = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        let stderr_end = write_end.try_clone()?;

        let mut command = Command::new(&program);
        command
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end));
        for (key, val) in env {
            command.env(key, val);
        }
        unsafe {
            command.pre_exec(move || {
                libc::setpgid(0, 0);
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
                if max_mem_bytes > 0 {
                    let limit = libc::rlimit {
                        rlim_cur: max_mem_bytes as libc::rlim_t,
                        rlim_max: max_mem_bytes as libc::rlim_t,
                    };
                    libc::setrlimit(libc::RLIMIT_AS, &limit);
                }
                Ok(())
            });
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::System(format!("cannot spawn {cmd:?}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::System("child stdin missing".into()))?;

        Ok(Self {
            pid: child.id() as libc::pid_t,
            stdin: Some(OwnedFd::from(stdin)),
            stdout: Some(read_end),
            buf: Vec::new(),
            pos: 0,
            peak_rss_kb: 0,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn peak_mem_kb(&self) -> i64 {
        self.peak_rss_kb
    }

    /// Write `line` plus a terminating newline, retrying partial writes.
    /// Fails when the pipe cannot accept bytes within the write timeout.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        if self.pid <= 0 {
            return Err(Error::System("process not running".into()));
        }
        let fd = match &self.stdin {
            Some(fd) => fd.as_raw_fd(),
            None => return Err(Error::System("process stdin closed".into())),
        };
        let data = format!("{line}\n");
        let bytes = data.as_bytes();
        let mut sent = 0;
        while sent < bytes.len() {
            let mut pfd = libc::pollfd {
                fd,
                events: libc::POLLOUT,
                revents: 0,
            };
            let ret = unsafe { libc::poll(&mut pfd, 1, crate::WRITE_TIMEOUT_MS as libc::c_int) };
            if ret <= 0 {
                if ret < 0 && interrupted() {
                    continue;
                }
                return Err(Error::System("write to process timed out".into()));
            }
            if pfd.revents & libc::POLLOUT == 0 {
                return Err(Error::System("write to process failed".into()));
            }
            let n = unsafe {
                libc::write(
                    fd,
                    bytes[sent..].as_ptr() as *const libc::c_void,
                    bytes.len() - sent,
                )
            };
            if n < 0 {
                if interrupted() {
                    continue;
                }
                return Err(Error::System(format!(
                    "write to process failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            sent += n as usize;
        }
        Ok(())
    }

    /// Return the next newline-terminated line, or `None` on deadline
    /// expiry. The second element is the observed wall time in ms. A `\r`
    /// suffix is stripped and empty lines are preserved.
    pub fn read_line(&mut self, timeout_ms: Millis) -> Result<(Option<String>, Millis)> {
        if self.pid <= 0 {
            return Ok((None, 0));
        }
        let start = Instant::now();
        loop {
            if stop::requested() {
                return Err(Error::Terminated);
            }
            if let Some(line) = self.take_line() {
                return Ok((Some(line), elapsed_ms(start)));
            }
            let used = elapsed_ms(start);
            if used >= timeout_ms {
                return Ok((None, used));
            }
            let slice = (timeout_ms - used).min(crate::POLL_SLICE_MS).max(0);
            self.fill(slice)?;
        }
    }

    fn take_line(&mut self) -> Option<String> {
        let nl = self.buf[self.pos..].iter().position(|&b| b == b'\n')?;
        let mut line = self.buf[self.pos..self.pos + nl].to_vec();
        self.pos += nl + 1;
        if self.pos > crate::READ_CHUNK_SIZE {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Poll the read end for up to `timeout_ms` with an all-signals-
    /// unblocked mask and pull whatever is available into the buffer.
    fn fill(&mut self, timeout_ms: Millis) -> Result<()> {
        let fd = match &self.stdout {
            Some(fd) => fd.as_raw_fd(),
            None => return Err(Error::System("process stdout closed".into())),
        };
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ts = libc::timespec {
            tv_sec: (timeout_ms / 1_000) as libc::time_t,
            tv_nsec: (timeout_ms % 1_000) as libc::c_long * 1_000_000,
        };
        let ret = loop {
            let mut empty: libc::sigset_t = unsafe { std::mem::zeroed() };
            unsafe { libc::sigemptyset(&mut empty) };
            let ret = unsafe { libc::ppoll(&mut pfd, 1, &ts, &empty) };
            if ret < 0 && interrupted() {
                continue;
            }
            break ret;
        };
        if ret < 0 {
            return Err(Error::System(format!(
                "poll failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        if ret == 0 {
            return Ok(());
        }
        if pfd.revents & (libc::POLLHUP | libc::POLLERR) != 0 && pfd.revents & libc::POLLIN == 0 {
            return Err(Error::Player(format!("process died: {}", self.reap())));
        }
        if pfd.revents & libc::POLLIN == 0 {
            return Ok(());
        }
        let mut chunk = [0u8; crate::READ_CHUNK_SIZE];
        let n = unsafe { libc::read(fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len()) };
        if n <= 0 {
            return Err(Error::Player(format!("process died: {}", self.reap())));
        }
        if self.buf.len() + n as usize > crate::CHANNEL_BUFFER_MAX {
            return Err(Error::Player("process output buffer overflow".into()));
        }
        self.buf.extend_from_slice(&chunk[..n as usize]);
        Ok(())
    }

    /// Collect the child's exit status after its pipe hung up, giving it a
    /// few ms to actually exit, and decode the cause by name.
    fn reap(&mut self) -> String {
        if self.pid <= 0 {
            return "process not running".into();
        }
        let mut status: libc::c_int = 0;
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let mut result = 0;
        for _ in 0..EXIT_CHECK_RETRIES {
            result = unsafe { libc::wait4(self.pid, &mut status, libc::WNOHANG, &mut usage) };
            if result != 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(EXIT_CHECK_INTERVAL_MS));
        }
        if result == 0 {
            return "process still running".into();
        }
        if result < 0 {
            return format!("waitpid failed: {}", std::io::Error::last_os_error());
        }
        self.peak_rss_kb = usage.ru_maxrss;
        self.pid = 0;
        decode_exit_status(status)
    }

    /// Ask the bot to quit with `END`, give it a short grace period, then
    /// `SIGKILL` the whole process group. Peak RSS comes from the final
    /// `rusage`.
    pub fn terminate(&mut self) {
        if self.pid > 0 {
            if let Some(fd) = &self.stdin {
                let end = b"END\n";
                unsafe { libc::write(fd.as_raw_fd(), end.as_ptr() as *const libc::c_void, end.len()) };
            }
            std::thread::sleep(Duration::from_millis(crate::TERMINATION_GRACE_MS));
            let mut status: libc::c_int = 0;
            let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
            unsafe {
                if libc::wait4(self.pid, &mut status, libc::WNOHANG, &mut usage) == 0 {
                    libc::kill(-self.pid, libc::SIGKILL);
                    libc::wait4(self.pid, &mut status, 0, &mut usage);
                }
            }
            self.peak_rss_kb = usage.ru_maxrss;
            self.pid = 0;
        }
        self.stdin = None;
        self.stdout = None;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn decode_exit_status(status: libc::c_int) -> String {
    if libc::WIFEXITED(status) {
        let code = libc::WEXITSTATUS(status);
        match code {
            0 => "exited normally".into(),
            code => format!("exited with code {code}"),
        }
    } else if libc::WIFSIGNALED(status) {
        match libc::WTERMSIG(status) {
            libc::SIGKILL => "killed by SIGKILL (killed/OOM)".into(),
            libc::SIGSEGV => "killed by SIGSEGV (segfault)".into(),
            libc::SIGABRT => "killed by SIGABRT (abort)".into(),
            libc::SIGTERM => "killed by SIGTERM (terminated)".into(),
            sig => format!("killed by signal {sig}"),
        }
    } else {
        "unknown exit status".into()
    }
}

fn interrupted() -> bool {
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR)
}

fn elapsed_ms(start: Instant) -> Millis {
    start.elapsed().as_millis() as Millis
}

/// Split a command line into words, honoring single and double quotes.
pub fn split_command(cmd: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quote: Option<char> = None;
    let mut pending = false;
    for c in cmd.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => word.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                pending = true;
            }
            None if c.is_whitespace() => {
                if pending || !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                    pending = false;
                }
            }
            None => word.push(c),
        }
    }
    if pending || !word.is_empty() {
        words.push(word);
    }
    words
}
