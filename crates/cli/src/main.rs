use std::process::ExitCode;

fn main() -> ExitCode {
    docwright_cli::run()
}
