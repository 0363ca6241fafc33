use clap::Parser;
use rmcp::ServiceExt;
use sprite_anim_mcp::SpriteAnimMcp;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sprite-anim-mcp", about = "MCP server for the spritesheet-to-animation pipeline")]
struct Args {
    /// Workspace directory to serve from (chdir target)
    #[arg(long, default_value = ".")]
    project_dir: String,
    /// Log level filter, used when RUST_LOG isn't set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Tool output rides stdio as the MCP transport, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .with_writer(std::io::stderr)
        .init();

    std::env::set_current_dir(&args.project_dir)?;

    let service = SpriteAnimMcp::new().serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
