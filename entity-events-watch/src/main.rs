use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    entity_events_watch::run().await?;
    Ok(())
}
