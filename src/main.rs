use rask_event_streamer::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::main().await
}
