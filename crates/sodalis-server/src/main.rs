#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sodalis_server::serve().await
}
