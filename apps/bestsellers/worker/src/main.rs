//! Bestsellers Worker Service - Entry Point
//!
//! Background worker that refreshes bestseller lists from the job queue.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    bestsellers_worker::run().await
}
