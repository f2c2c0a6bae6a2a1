use std::process::ExitCode;

fn main() -> ExitCode {
    clearview_cli::run()
}
