use std::process::ExitCode;

fn main() -> ExitCode {
    match mirrorgate::cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
