#[tokio::main]
async fn main() -> anyhow::Result<()> {
    playita_pos_lib::run().await
}
