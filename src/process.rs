use crate::config::SpawnConfig;
use crate::error::{Result, SubprocError, EXIT_CANNOT_EXEC, EXIT_NOT_FOUND};
use crate::redirect::{apply_all, StreamAction, Target};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{chdir, close, execve, execvp, fork, setsid, sysconf, ForkResult, Pid, SysconfVar};
use std::ffi::CString;
use std::fs::File;
use std::os::unix::io::RawFd;

/// Lifecycle states of a spawned child. Transitions are monotonic:
/// `Spawning -> Running -> Dead`, never backwards. `Spawning` only exists
/// inside `Process::open`, between resource allocation and the return of
/// the creation primitive, so partial-construction failures tear down
/// cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Spawning,
    Running,
    Dead,
}

/// A spawned child process.
///
/// Owns its copy of the argument vector and any parent-side stream
/// handles; dropping it kills and reaps a still-running child and
/// releases everything exactly once.
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    argv: Vec<String>,
    status: Status,
    exit_code: Option<i32>,
    /// Write end of the child's stdin, present when stdin was configured
    /// as a pipe.
    pub stdin: Option<File>,
    /// Read end of the child's stdout, present when stdout was configured
    /// as a pipe.
    pub stdout: Option<File>,
    /// Read end of the child's stderr, present when stderr was configured
    /// as a pipe.
    pub stderr: Option<File>,
}

impl Process {
    /// Spawn a child process and return without waiting for it.
    ///
    /// All pipe-backed redirects are materialized before the child is
    /// created so both sides see consistent, already-open descriptors.
    /// In the child: session detach, working-directory change, the full
    /// redirection order, and the descriptor-closing policy are applied
    /// before the image is replaced with `argv`. Setup failures in the
    /// child surface only through the reserved exit codes
    /// [`EXIT_CANNOT_EXEC`] and [`EXIT_NOT_FOUND`], since no other error
    /// channel exists once the fork has happened.
    pub fn open(argv: &[String], config: SpawnConfig) -> Result<Process> {
        if argv.is_empty() {
            return Err(SubprocError::InvalidArguments(
                "empty argument vector".to_string(),
            ));
        }
        let c_argv = cstring_vec(argv)?;
        let SpawnConfig {
            cwd,
            env,
            stdin,
            stdout,
            stderr,
            redirect_order,
            detach,
            inherit_fds,
            non_blocking_pipes,
        } = config;
        let c_env = env.as_deref().map(cstring_vec).transpose()?;
        let c_cwd = cwd
            .as_deref()
            .map(crate::redirect::path_cstring)
            .transpose()?;

        // Pipes must exist before the fork; creating them afterwards
        // would race with the child's descriptor table. A resolve failure
        // here drops any pipes already materialized.
        let mut actions = [
            stdin.resolve(Target::Stdin, non_blocking_pipes)?,
            stdout.resolve(Target::Stdout, non_blocking_pipes)?,
            stderr.resolve(Target::Stderr, non_blocking_pipes)?,
        ];

        match unsafe { fork() }.map_err(SubprocError::SystemError)? {
            ForkResult::Parent { child } => {
                let mut process = Process {
                    pid: child,
                    argv: argv.to_vec(),
                    status: Status::Spawning,
                    exit_code: None,
                    stdin: None,
                    stdout: None,
                    stderr: None,
                };
                process.status = Status::Running;
                // A failure past this point drops the partially-built
                // process, which kills and reaps the child.
                let [stdin_action, stdout_action, stderr_action] = actions;
                process.stdin = parent_stream(stdin_action, true)?;
                process.stdout = parent_stream(stdout_action, false)?;
                process.stderr = parent_stream(stderr_action, false)?;
                Ok(process)
            }
            ForkResult::Child => {
                let code = child_exec(
                    &c_argv,
                    c_env.as_deref(),
                    c_cwd.as_ref(),
                    &mut actions,
                    redirect_order,
                    detach,
                    inherit_fds,
                );
                // _exit, not exit: no atexit handlers, no unwinding in
                // the forked child.
                unsafe { libc::_exit(code) }
            }
        }
    }

    /// Spawn a child process and block until it terminates.
    ///
    /// A half-reaped process is never returned: if the wait itself fails
    /// the child is destroyed and the error propagated.
    pub fn run(argv: &[String], config: SpawnConfig) -> Result<Process> {
        let mut process = Self::open(argv, config)?;
        process.wait()?;
        Ok(process)
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The process's own copy of the argument vector it was spawned with.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Cached exit result. Normal exits carry the raw status (0-255);
    /// signal deaths carry `128 + signo`. `None` while undetermined.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Deliver `signal` to the child. Rejects a process already reaped.
    pub fn signal(&mut self, signal: Signal) -> Result<()> {
        if self.status == Status::Dead {
            return Err(SubprocError::ProcessDead);
        }
        signal::kill(self.pid, signal).map_err(SubprocError::SystemError)
    }

    /// Send SIGTERM to the child.
    pub fn terminate(&mut self) -> Result<()> {
        self.signal(Signal::SIGTERM)
    }

    /// Send SIGKILL to the child.
    pub fn kill(&mut self) -> Result<()> {
        self.signal(Signal::SIGKILL)
    }

    /// Close the stdin stream handle if present, signalling end-of-input
    /// to a pipe-fed child. Subsequent calls are no-ops.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Block until the child terminates and decode its exit result.
    ///
    /// Idempotent: once the child is reaped the cached result is returned
    /// and the reap never repeats. `Ok(None)` is only possible if the
    /// reap reports something that is neither a normal exit nor a signal
    /// death, in which case the status is left unchanged rather than
    /// guessed at.
    pub fn wait(&mut self) -> Result<Option<i32>> {
        self.reap(None)
    }

    /// Non-blocking variant of [`wait`](Self::wait): returns `Ok(None)`
    /// without touching any state while the child is still running.
    pub fn poll(&mut self) -> Result<Option<i32>> {
        self.reap(Some(WaitPidFlag::WNOHANG))
    }

    fn reap(&mut self, flags: Option<WaitPidFlag>) -> Result<Option<i32>> {
        if self.status == Status::Dead {
            return Ok(self.exit_code);
        }
        loop {
            return match waitpid(self.pid, flags) {
                Ok(WaitStatus::Exited(_, code)) => {
                    self.exit_code = Some(code);
                    self.status = Status::Dead;
                    Ok(self.exit_code)
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    self.exit_code = Some(128 + signal as i32);
                    self.status = Status::Dead;
                    Ok(self.exit_code)
                }
                Ok(WaitStatus::StillAlive) => Ok(None),
                // Stopped/continued children are not terminations; leave
                // the status untouched and report undetermined.
                Ok(_) => Ok(None),
                Err(Errno::EINTR) => continue,
                Err(e) => Err(SubprocError::SystemError(e)),
            };
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.status == Status::Running {
            // Best-effort: an unkillable child is still waited on.
            let _ = signal::kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
            self.status = Status::Dead;
        }
    }
}

/// Convert a pipe action into the parent-side stream handle, if any.
///
/// Non-pipe actions are dropped here, which closes whatever descriptors
/// they still hold in the parent (notably the read end of a bytes
/// preloaded pipe once the child owns its duplicate).
fn parent_stream(action: StreamAction, for_writing: bool) -> Result<Option<File>> {
    match action {
        StreamAction::Pipe { pair } => {
            let file = if for_writing {
                pair.into_writer()?
            } else {
                pair.into_reader()?
            };
            Ok(Some(file))
        }
        _ => Ok(None),
    }
}

/// Child-side setup and exec. Runs between fork and image replacement,
/// so it never returns control on success and reports failure only via
/// its exit code.
fn child_exec(
    argv: &[CString],
    env: Option<&[CString]>,
    cwd: Option<&CString>,
    actions: &mut [StreamAction; 3],
    order: [Target; 3],
    detach: bool,
    inherit_fds: bool,
) -> i32 {
    if detach {
        if let Err(e) = setsid() {
            eprintln!("subproc: setsid: {}", e);
            return EXIT_CANNOT_EXEC;
        }
    }
    if let Some(dir) = cwd {
        if let Err(e) = chdir(dir.as_c_str()) {
            eprintln!("subproc: chdir: {}", e);
            return EXIT_CANNOT_EXEC;
        }
    }
    if apply_all(actions, order).is_err() {
        // Diagnostic already written by the redirection engine.
        return EXIT_CANNOT_EXEC;
    }
    if !inherit_fds {
        close_extra_fds();
    }
    let err = match env {
        Some(env) => execve(&argv[0], argv, env),
        None => execvp(&argv[0], argv),
    };
    let errno = match err {
        Ok(infallible) => match infallible {},
        Err(e) => e,
    };
    eprintln!("subproc: exec {:?}: {}", argv[0], errno);
    exec_error_code(errno)
}

/// Map an exec failure to a reserved exit code. A present-but-unusable
/// target (directory, permission, bad interpreter or library, I/O error)
/// is "cannot execute"; everything else is "not found".
fn exec_error_code(errno: Errno) -> i32 {
    match errno {
        Errno::EISDIR | Errno::EACCES | Errno::ENOEXEC | Errno::EIO => EXIT_CANNOT_EXEC,
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Errno::ELIBBAD => EXIT_CANNOT_EXEC,
        _ => EXIT_NOT_FOUND,
    }
}

/// Close every descriptor above stderr. Best-effort, child-side.
///
/// Scans the process's own open-descriptor list where the kernel exposes
/// one; otherwise falls back to a bounded sweep up to OPEN_MAX.
fn close_extra_fds() {
    let mut listed: Option<Vec<RawFd>> = None;
    if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
        listed = Some(
            entries
                .flatten()
                .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
                .collect(),
        );
        // The directory handle itself is in the list; closing its stale
        // number after the iterator is gone is harmless.
    }
    match listed {
        Some(fds) => {
            for fd in fds {
                if fd > 2 {
                    let _ = close(fd);
                }
            }
        }
        None => {
            let max = sysconf(SysconfVar::OPEN_MAX)
                .ok()
                .flatten()
                .unwrap_or(1024);
            for fd in 3..max as RawFd {
                let _ = close(fd);
            }
        }
    }
}

fn cstring_vec<S: AsRef<str>>(strings: &[S]) -> Result<Vec<CString>> {
    strings
        .iter()
        .map(|s| {
            CString::new(s.as_ref()).map_err(|_| {
                SubprocError::InvalidArguments(format!(
                    "argument contains an interior NUL byte: {:?}",
                    s.as_ref()
                ))
            })
        })
        .collect()
}
