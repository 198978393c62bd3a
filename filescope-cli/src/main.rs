// These Clippy lints are disabled because this is a CLI binary, not a library:
// - print_stdout/print_stderr: CLI tools are expected to print to stdout/stderr for user output.
// - exit: Calling `std::process::exit()` is how the verdict reaches the shell.
#![allow(clippy::print_stdout, clippy::print_stderr, clippy::exit)]

mod batch;
mod cli;
mod logging;
mod server;

/// Exit status for usage and configuration errors.
const EXIT_USAGE: i32 = 2;

#[tokio::main]
async fn main() {
    match cli::run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(EXIT_USAGE);
        }
    }
}
