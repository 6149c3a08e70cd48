use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use scan_report_bot::config::Config;
use scan_report_bot::conversation::ConversationController;
use scan_report_bot::executor::NmapExecutor;
use scan_report_bot::geo::IpApiLocator;
use scan_report_bot::intake::Intake;
use scan_report_bot::messenger::TelegramClient;
use scan_report_bot::pipeline::Pipeline;
use scan_report_bot::{bot, logging, server};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be populated.
    let _ = dotenv::dotenv();
    let cfg = Config::parse();
    logging::initialize_logging();
    info!(config = ?cfg, "starting scan-report-bot");

    let cancel = CancellationToken::new();
    let telegram = TelegramClient::new(&cfg.telegram_bot_token)?;
    let controller = Arc::new(ConversationController::new(cfg.session_ttl()));
    let scanner = Arc::new(NmapExecutor::new(
        cfg.nmap_bin.clone(),
        cfg.work_dir.clone(),
        cfg.scan_timeout(),
        cfg.max_concurrent_scans,
    ));
    let geo = Arc::new(IpApiLocator::new(cfg.geo_endpoint.clone())?);
    let messenger = Arc::new(telegram.clone());

    let pipeline = Arc::new(Pipeline::new(
        scanner,
        geo,
        messenger.clone(),
        controller.clone(),
        cfg.reports_dir.clone(),
        cancel.clone(),
    ));
    let intake = Arc::new(Intake::new(controller, messenger, pipeline, cfg.public_url()));

    let bind = cfg.bind_addr();
    let server_task = {
        let intake = intake.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, intake, cancel.clone()).await {
                error!(error = %e, "capture endpoint stopped");
                cancel.cancel();
            }
        })
    };
    let bot_task = tokio::spawn(bot::run_polling(telegram, intake, cancel.clone()));

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for Ctrl+C")?;
            info!("shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
    let _ = tokio::join!(server_task, bot_task);
    Ok(())
}
