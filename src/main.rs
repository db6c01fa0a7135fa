use fluxel::critical;
use std::process::ExitCode;

fn main() -> ExitCode {
    fluxel::log::init();

    match fluxel::process::run_from_env() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            critical!("{}", err.report());
            ExitCode::FAILURE
        }
    }
}
