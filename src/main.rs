#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    flow_cli::cli::run().await
}
