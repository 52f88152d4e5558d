// Platform-specific compilation guard
#[cfg(not(unix))]
compile_error!("subproc requires a Unix-like operating system with fork/exec and \
                pipe support. Windows is not supported.");

#[cfg(unix)]
pub mod cli;
#[cfg(unix)]
pub mod config;
#[cfg(unix)]
pub mod error;
#[cfg(unix)]
pub mod pipe;
#[cfg(unix)]
pub mod process;
#[cfg(unix)]
pub mod redirect;
