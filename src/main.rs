#[tokio::main]
async fn main() -> eyre::Result<()> {
    relayq::run().start().await
}
