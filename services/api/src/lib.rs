mod cli;
mod infra;
mod routes;
mod scheduler;
mod server;

use case_tracker::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
