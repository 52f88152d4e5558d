use thiserror::Error;

use crate::redirect::Target;

/// Exit code a child reports when setup (cwd, redirection, permissions)
/// prevented the command from executing.
pub const EXIT_CANNOT_EXEC: i32 = 126;

/// Exit code a child reports when the command could not be located or is
/// not a recognizable executable.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Main error type for subproc operations
#[derive(Error, Debug)]
pub enum SubprocError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Redirect kind {kind} is not valid for {target}")]
    InvalidRedirect { kind: &'static str, target: Target },

    #[error("Process is already dead")]
    ProcessDead,

    #[error("Failed to create pipe: {0}")]
    PipeError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("System error: {0}")]
    SystemError(#[from] nix::Error),
}

/// Result type alias for subproc operations
pub type Result<T> = std::result::Result<T, SubprocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_exit_codes_are_disjoint_from_signal_encoding() {
        // Signal exits are encoded as 128 + signo, so 126/127 stay reserved
        // for the child-setup failure channel.
        assert!(EXIT_CANNOT_EXEC < 128);
        assert!(EXIT_NOT_FOUND < 128);
        assert_ne!(EXIT_CANNOT_EXEC, EXIT_NOT_FOUND);
    }

    #[test]
    fn errors_display_context() {
        let err = SubprocError::InvalidRedirect {
            kind: "bytes",
            target: Target::Stdout,
        };
        assert!(err.to_string().contains("stdout"));

        let err = SubprocError::InvalidArguments("empty argv".to_string());
        assert!(err.to_string().contains("empty argv"));
    }
}
