use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::intake::Intake;
use crate::messenger::TelegramClient;

const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Long-poll Telegram for messages and hand each one to the intake until cancelled.
pub async fn run_polling(client: TelegramClient, intake: Arc<Intake>, cancel: CancellationToken) {
    if let Err(e) = client.set_commands().await {
        warn!(error = %e, "failed to register bot commands");
    }
    info!("polling for messages");

    let mut offset = 0;
    loop {
        let batch = tokio::select! {
            res = client.get_updates(offset) => res,
            _ = cancel.cancelled() => break,
        };
        match batch {
            Ok((next, messages)) => {
                offset = next;
                for message in messages {
                    debug!(chat = message.chat, update = message.update_id, "message received");
                    if let Err(e) = intake.handle_text(message.chat, &message.text).await {
                        warn!(chat = message.chat, error = %e, "failed to answer message");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "polling failed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
    }
    info!("polling stopped");
}
