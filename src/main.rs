use std::process::ExitCode;

fn main() -> ExitCode {
    match appforge::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            appforge::ui::failure(format!("error: {err:#}"));
            ExitCode::FAILURE
        }
    }
}
