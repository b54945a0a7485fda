use std::process::ExitCode;

fn main() -> ExitCode {
    knatty_cli::run()
}
