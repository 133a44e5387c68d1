//! caelus - Entry Point
//!
//! Harvests mailing-list threads, assembles prompts from related threads and
//! sends them to a language model under a daily token budget.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    caelus::run().await
}
