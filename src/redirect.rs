use crate::error::{Result, SubprocError};
use crate::pipe::PipePair;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2};
use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

/// One of the three standard streams a redirect applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Stdin,
    Stdout,
    Stderr,
}

impl Target {
    pub fn fileno(self) -> RawFd {
        match self {
            Target::Stdin => 0,
            Target::Stdout => 1,
            Target::Stderr => 2,
        }
    }

    fn is_input(self) -> bool {
        self == Target::Stdin
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Stdin => write!(f, "stdin"),
            Target::Stdout => write!(f, "stdout"),
            Target::Stderr => write!(f, "stderr"),
        }
    }
}

/// The natural redirection order: stdin, then stdout, then stderr.
pub const NATURAL_ORDER: [Target; 3] = [Target::Stdin, Target::Stdout, Target::Stderr];

/// Validate a caller-supplied redirection order, substituting the natural
/// order if it is not a permutation of the three targets.
pub fn check_order(order: [Target; 3]) -> [Target; 3] {
    if order[0] == order[1] || order[0] == order[2] || order[1] == order[2] {
        NATURAL_ORDER
    } else {
        order
    }
}

/// How one standard stream of the child is sourced or sinked.
///
/// Each variant carries only the payload that kind needs, so a
/// mismatched kind/payload read is unrepresentable.
#[derive(Debug, Clone, Default)]
pub enum Redirect {
    /// Inherit the stream from the parent. The default.
    #[default]
    Inherit,
    /// Redirect from/to the named file, truncating on write.
    Path(PathBuf),
    /// Redirect to the named file, appending. Same as `Path` for stdin.
    Append(PathBuf),
    /// Discard to (or read EOF from) the null device.
    DevNull,
    /// Redirect from/to an existing descriptor, which is consumed in the
    /// child. The parent's copy stays open and remains the caller's.
    Fd(RawFd),
    /// Connect a pipe whose parent end is exposed as a stream handle on
    /// the spawned process.
    Pipe,
    /// Feed the stream from a fixed byte payload. Stdin only.
    Bytes(Vec<u8>),
    /// Make stderr follow stdout. Stderr only.
    ToStdout,
    /// Make stdout follow stderr. Stdout only.
    ToStderr,
}

impl Redirect {
    /// Resolve into a fork-ready action for `target`, materializing any
    /// pipe and pre-converting paths so the child branch only performs
    /// async-signal-safe syscalls. Kind/target mismatches are rejected
    /// here, before any process exists.
    pub(crate) fn resolve(self, target: Target, non_blocking: bool) -> Result<StreamAction> {
        match self {
            Redirect::Inherit => Ok(StreamAction::Inherit),
            Redirect::Path(path) => Ok(StreamAction::Open {
                path: path_cstring(&path)?,
                flags: open_flags(target, false),
            }),
            Redirect::Append(path) => Ok(StreamAction::Open {
                path: path_cstring(&path)?,
                flags: open_flags(target, true),
            }),
            Redirect::DevNull => Ok(StreamAction::Open {
                path: path_cstring(Path::new("/dev/null"))?,
                flags: open_flags(target, false),
            }),
            Redirect::Fd(fd) => Ok(StreamAction::Dup { fd }),
            Redirect::Pipe => Ok(StreamAction::Pipe {
                pair: PipePair::new(non_blocking)?,
            }),
            Redirect::Bytes(bytes) => {
                if !target.is_input() {
                    return Err(SubprocError::InvalidRedirect {
                        kind: "bytes",
                        target,
                    });
                }
                Ok(StreamAction::Bytes {
                    pair: PipePair::with_bytes(&bytes, non_blocking)?,
                })
            }
            Redirect::ToStdout => {
                if target != Target::Stderr {
                    return Err(SubprocError::InvalidRedirect {
                        kind: "to-stdout",
                        target,
                    });
                }
                Ok(StreamAction::Follow {
                    other: Target::Stdout,
                })
            }
            Redirect::ToStderr => {
                if target != Target::Stdout {
                    return Err(SubprocError::InvalidRedirect {
                        kind: "to-stderr",
                        target,
                    });
                }
                Ok(StreamAction::Follow {
                    other: Target::Stderr,
                })
            }
        }
    }
}

/// A resolved, fork-ready redirect. Everything that could allocate or
/// fail recoverably happened at resolve time in the parent; `apply` runs
/// in the forked child where open/dup2/close are the only tools and the
/// sole error channel is a diagnostic plus a reserved exit code.
#[derive(Debug)]
pub(crate) enum StreamAction {
    Inherit,
    Open { path: CString, flags: OFlag },
    Dup { fd: RawFd },
    Pipe { pair: PipePair },
    Bytes { pair: PipePair },
    Follow { other: Target },
}

impl StreamAction {
    /// Substitute `target` in the current process image according to this
    /// action. Child-side.
    pub(crate) fn apply(&mut self, target: Target) -> Result<()> {
        match self {
            StreamAction::Inherit => Ok(()),
            StreamAction::Open { path, flags } => {
                let fd = open(path.as_c_str(), *flags, Mode::from_bits_truncate(0o666))?;
                if fd != target.fileno() {
                    dup2(fd, target.fileno())?;
                    close(fd)?;
                }
                Ok(())
            }
            StreamAction::Dup { fd } => {
                dup2(*fd, target.fileno())?;
                if *fd != target.fileno() {
                    close(*fd)?;
                }
                Ok(())
            }
            StreamAction::Pipe { pair } | StreamAction::Bytes { pair } => {
                let src = if target.is_input() {
                    pair.read_fd()
                } else {
                    pair.write_fd()
                };
                dup2(src, target.fileno())?;
                pair.close()?;
                Ok(())
            }
            StreamAction::Follow { other } => {
                dup2(other.fileno(), target.fileno())?;
                Ok(())
            }
        }
    }

    /// Whether the parent should expose a stream handle for this action.
    pub(crate) fn is_pipe(&self) -> bool {
        matches!(self, StreamAction::Pipe { .. })
    }
}

/// Apply all three redirects in the given order, stopping at the first
/// failure. The order only matters for the follow kinds and for redirects
/// whose source descriptor is a target modified by an earlier step, which
/// is exactly why it is caller-configurable.
///
/// Runs in the forked child; on failure a diagnostic has already been
/// written to the child's stderr and the caller exits with the reserved
/// cannot-execute code.
pub(crate) fn apply_all(actions: &mut [StreamAction; 3], order: [Target; 3]) -> Result<()> {
    for target in check_order(order) {
        let action = &mut actions[target.fileno() as usize];
        if let Err(e) = action.apply(target) {
            eprintln!("subproc: redirect {}: {}", target, e);
            return Err(e);
        }
    }
    Ok(())
}

pub(crate) fn path_cstring(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        SubprocError::InvalidArguments(format!(
            "path contains an interior NUL byte: {}",
            path.display()
        ))
    })
}

fn open_flags(target: Target, append: bool) -> OFlag {
    if target.is_input() {
        // Append is meaningless when reading; treat it as plain open.
        OFlag::O_RDONLY
    } else if append {
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND
    } else {
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_targets_fall_back_to_natural_order() {
        let order = [Target::Stdin, Target::Stdin, Target::Stderr];
        assert_eq!(check_order(order), NATURAL_ORDER);
        let order = [Target::Stderr, Target::Stderr, Target::Stderr];
        assert_eq!(check_order(order), NATURAL_ORDER);
    }

    #[test]
    fn valid_permutations_are_kept() {
        let order = [Target::Stderr, Target::Stdout, Target::Stdin];
        assert_eq!(check_order(order), order);
    }

    #[test]
    fn bytes_is_stdin_only() {
        let err = Redirect::Bytes(b"x".to_vec())
            .resolve(Target::Stdout, false)
            .unwrap_err();
        assert!(matches!(
            err,
            SubprocError::InvalidRedirect { kind: "bytes", .. }
        ));
        assert!(Redirect::Bytes(b"x".to_vec())
            .resolve(Target::Stdin, false)
            .is_ok());
    }

    #[test]
    fn follow_kinds_reject_their_own_target() {
        assert!(Redirect::ToStdout.resolve(Target::Stdout, false).is_err());
        assert!(Redirect::ToStdout.resolve(Target::Stdin, false).is_err());
        assert!(Redirect::ToStdout.resolve(Target::Stderr, false).is_ok());

        assert!(Redirect::ToStderr.resolve(Target::Stderr, false).is_err());
        assert!(Redirect::ToStderr.resolve(Target::Stdout, false).is_ok());
    }

    #[test]
    fn path_with_interior_nul_is_rejected() {
        let path = PathBuf::from("bad\0path");
        assert!(Redirect::Path(path).resolve(Target::Stdout, false).is_err());
    }

    #[test]
    fn stdin_append_opens_read_only() {
        assert_eq!(open_flags(Target::Stdin, true), OFlag::O_RDONLY);
        assert!(open_flags(Target::Stdout, true).contains(OFlag::O_APPEND));
        assert!(open_flags(Target::Stderr, false).contains(OFlag::O_TRUNC));
    }

    #[test]
    fn pipe_resolve_materializes_both_ends() {
        let action = Redirect::Pipe.resolve(Target::Stdout, false).unwrap();
        match action {
            StreamAction::Pipe { pair } => {
                assert!(pair.read_fd() >= 0);
                assert!(pair.write_fd() >= 0);
            }
            other => panic!("expected pipe action, got {:?}", other),
        }
    }
}
