mod bootstrap;
mod cli;
mod console;
mod paths;
mod remote;
mod run;

use std::process::ExitCode;

use sandbox::SandboxError;

fn main() -> ExitCode {
    let cli = cli::parse();
    run::initialise_tracing(cli.verbose);

    match run::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(SandboxError::FatalInit(reason)) = err.downcast_ref::<SandboxError>() {
                eprintln!("{reason}\n");
                eprintln!("{}", cli::usage());
            } else {
                tracing::error!("{err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
