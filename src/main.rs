#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dice_settler::telemetry::init();
    dice_settler::run().await
}
