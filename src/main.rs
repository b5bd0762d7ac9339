use std::process::ExitCode;

fn main() -> ExitCode {
    match affine_closure::cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
