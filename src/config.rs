use crate::redirect::{Redirect, Target, NATURAL_ORDER};
use std::path::PathBuf;

/// Spawn-time configuration for a child process.
///
/// Read-only from the lifecycle manager's perspective; pipe-backed
/// redirects are materialized into an internal plan rather than mutating
/// this struct. Construct with struct-update syntax over `Default`:
///
/// ```
/// use subproc::config::SpawnConfig;
/// use subproc::redirect::Redirect;
///
/// let config = SpawnConfig {
///     stdin: Redirect::Pipe,
///     stdout: Redirect::DevNull,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Working directory to change to before execution. Failure to enter
    /// it surfaces as the cannot-execute exit code.
    pub cwd: Option<PathBuf>,
    /// Replacement environment as `KEY=VALUE` entries, passed via exact-path
    /// `execve`. When unset the child inherits the parent environment and
    /// the program is located with a PATH search.
    pub env: Option<Vec<String>>,
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
    /// Order in which the three streams are redirected in the child. A
    /// non-permutation silently falls back to the natural order.
    pub redirect_order: [Target; 3],
    /// Start the child in a new session, detached from the controlling
    /// terminal and job control.
    pub detach: bool,
    /// Keep descriptors above stderr open in the child. When false every
    /// descriptor past the three standard streams is closed before exec.
    pub inherit_fds: bool,
    /// Create pipe-backed redirects with both ends non-blocking.
    pub non_blocking_pipes: bool,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            cwd: None,
            env: None,
            stdin: Redirect::Inherit,
            stdout: Redirect::Inherit,
            stderr: Redirect::Inherit,
            redirect_order: NATURAL_ORDER,
            detach: false,
            inherit_fds: false,
            non_blocking_pipes: false,
        }
    }
}
