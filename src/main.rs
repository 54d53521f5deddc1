#[tokio::main]
async fn main() -> anyhow::Result<()> {
    replycast_lib::run().await
}
