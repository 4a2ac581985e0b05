use std::process::ExitCode;

fn main() -> ExitCode {
    match fluxpipe_cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
