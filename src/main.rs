use std::process::ExitCode;

use a11yscope_cli::cli::{app, ExitStatus};

#[tokio::main]
async fn main() -> ExitCode {
    match app::run().await {
        Ok(status) => status.into(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitStatus::Fatal.into()
        }
    }
}
