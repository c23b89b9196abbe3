// The binary uses the library, not duplicate modules
use phototrack::{Settings, run, setup_logging};
use std::process::ExitCode;

fn main() -> ExitCode {
    setup_logging();
    let settings = Settings::from_cli();

    match run(&settings) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
