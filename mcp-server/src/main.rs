use clap::Parser;
use skypulse_mcp_server::Cli;
use skypulse_mcp_server::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_main(Cli::parse()).await
}
