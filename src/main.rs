use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match windlass::cli::run().await {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
