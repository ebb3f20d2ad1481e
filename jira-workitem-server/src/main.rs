//! JIRA Work Item Server - category-aware JIRA work items via MCP
//!
//! Serves the work item tools over STDIO.

use jira_workitem_server::JiraMcpServer;
use pulseengine_mcp_server::McpServerBuilder;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configure logging for STDIO transport
    JiraMcpServer::configure_stdio_logging();

    info!("Starting JIRA Work Item Server...");

    let jira_server = match JiraMcpServer::new().await {
        Ok(server) => {
            info!("JIRA Work Item Server created successfully");
            server
        }
        Err(e) => {
            error!("Failed to create JIRA Work Item Server: {}", e);
            eprintln!("❌ Failed to start JIRA Work Item Server: {}", e);
            eprintln!("\nPlease check:");
            eprintln!("  - JIRA_URL environment variable is set");
            eprintln!("  - JIRA authentication is configured (JIRA_AUTH_TYPE, JIRA_TOKEN, etc.)");
            eprintln!("  - config/jira-workitem-config.toml is valid TOML, if present");
            std::process::exit(1);
        }
    };

    info!("Starting MCP server with STDIO transport...");

    // Start the server using the macro-generated infrastructure
    let mut server = jira_server.serve_stdio().await?;

    info!("🚀 JIRA Work Item Server is running and ready to serve requests");

    server.run().await?;

    Ok(())
}
