use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    bisect_cli::main_entry().await
}
