use anyhow::Context;
use subproc::cli::Cli;
use subproc::process::Process;

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("subproc: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<i32> {
    let args = Cli::parse_args();
    args.validate().context("invalid arguments")?;

    let config = args.to_config();
    let process = Process::run(&args.command, config)
        .with_context(|| format!("failed to run {:?}", args.command[0]))?;

    // A signal death reads as 128 + signo, same as a shell would report.
    let code = process.exit_code().unwrap_or(1);
    if args.verbose {
        eprintln!("subproc: {:?} exited with code {}", args.command[0], code);
    }
    Ok(code)
}
