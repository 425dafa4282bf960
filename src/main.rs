use shift_notifier::service::{run_server, ServiceConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = ServiceConfig::from_env();
    run_server(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}
