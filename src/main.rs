use attendance_ledger::app;
use attendance_ledger::config::Config;
use attendance_ledger::ledger::Ledger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env();
    let ledger = Ledger::connect(&config).await?;
    log::info!("Attendance ledger opened at {}", config.database_url);

    let report = ledger.verify_chain().await?;
    if !report.is_valid() {
        log::warn!("Chain integrity at startup: {}", report.message);
    }

    let addr = config.bind_addr;
    let app = app(ledger, config);
    log::info!("Starting attendance ledger HTTP server on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await?;
    Ok(())
}
