use std::process::ExitCode;

fn main() -> ExitCode {
    cabbot_cli::run()
}
