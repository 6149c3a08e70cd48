use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::conversation::ConversationController;
use crate::executor::ScanTool;
use crate::geo::GeoLocator;
use crate::messenger::{Messenger, Outgoing};
use crate::parser;
use crate::report;
use crate::types::{GeoInfo, ScanReport, ScanRequest};

/// Runs one scan request end to end: scan, parse, geolocate, render, write, deliver.
pub struct Pipeline {
    scanner: Arc<dyn ScanTool>,
    geo: Arc<dyn GeoLocator>,
    messenger: Arc<dyn Messenger>,
    controller: Arc<ConversationController>,
    reports_dir: PathBuf,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        scanner: Arc<dyn ScanTool>,
        geo: Arc<dyn GeoLocator>,
        messenger: Arc<dyn Messenger>,
        controller: Arc<ConversationController>,
        reports_dir: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            scanner,
            geo,
            messenger,
            controller,
            reports_dir: reports_dir.into(),
            cancel,
        }
    }

    /// Run the request in the background. The requester's session is always
    /// released when the task ends, whatever the outcome.
    pub fn spawn(self: &Arc<Self>, request: ScanRequest) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let chat = request.requester;
            let target = request.target.clone();
            match this.run(&request).await {
                Ok(path) => info!(address = %target, chat, path = %path.display(), "report delivered"),
                Err(e) => {
                    error!(address = %target, chat, error = ?e, "report generation failed");
                    let notice = Outgoing::plain(format!(
                        "Could not generate the report for {target}. Please try again later."
                    ));
                    if let Err(e) = this.messenger.send_message(chat, &notice).await {
                        warn!(chat, error = %e, "failed to send failure notice");
                    }
                }
            }
            this.controller.finish(chat);
        })
    }

    async fn run(&self, request: &ScanRequest) -> Result<PathBuf> {
        let chat = request.requester;
        let target = request.target.as_str();

        // The scan still runs when the acknowledgement cannot be delivered.
        if let Err(e) = self
            .messenger
            .send_message(
                chat,
                &Outgoing::plain(format!("Generating report for {target}...")),
            )
            .await
        {
            warn!(chat, address = target, error = %e, "failed to acknowledge request");
        }

        let geo = match self.geo.lookup(target).await {
            Ok(geo) => geo,
            Err(e) => {
                warn!(address = target, error = %e, "geolocation unavailable");
                GeoInfo::unknown(target)
            }
        };

        let output = self
            .scanner
            .run(target, self.cancel.child_token())
            .await
            .context("scan failed")?;

        let findings = parser::parse_scan_output(&output.raw);
        let report = ScanReport {
            geo,
            duration: output.duration,
            findings,
            generated_at: OffsetDateTime::now_utc(),
        };
        let path = report::write_report(&self.reports_dir, &report).await?;
        info!(address = target, path = %path.display(), "report written");

        self.messenger
            .send_document(chat, &path)
            .await
            .context("failed to deliver report")?;
        Ok(path)
    }
}
