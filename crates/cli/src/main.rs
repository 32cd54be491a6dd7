use std::process::ExitCode;

fn main() -> ExitCode {
    quotedoc_cli::run()
}
