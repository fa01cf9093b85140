/// Waflow server entry point
///
/// The server provides:
/// - Workflow management and execution at /api/tenants/{tenant_id}/workflows/*
/// - Event publication at /api/tenants/{tenant_id}/events/{event_name}
/// - Job queue access at /api/tenants/{tenant_id}/jobs/*
/// - Health check at /healthz

use waflow::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes from WAFLOW_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
