use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tracing::info;

use crate::conversation::{
    Action, CaptureOutcome, ConversationController, Inbound, CURRENT_ADDRESS_LABEL,
    OTHER_ADDRESS_LABEL,
};
use crate::messenger::{Messenger, Outgoing};
use crate::pipeline::Pipeline;
use crate::types::ChatId;

/// Connects inbound events to the conversation state machine and the pipeline.
pub struct Intake {
    controller: Arc<ConversationController>,
    messenger: Arc<dyn Messenger>,
    pipeline: Arc<Pipeline>,
    public_url: String,
}

impl Intake {
    pub fn new(
        controller: Arc<ConversationController>,
        messenger: Arc<dyn Messenger>,
        pipeline: Arc<Pipeline>,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            messenger,
            pipeline,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Auto-capture link the requester opens to report their own address.
    pub fn capture_link(&self, chat: ChatId) -> String {
        format!("{}/track?chatId={chat}", self.public_url)
    }

    /// Handle one text message from a requester.
    pub async fn handle_text(&self, chat: ChatId, text: &str) -> Result<()> {
        let action = self
            .controller
            .handle(chat, Inbound::classify(text), Instant::now());
        let reply = match action {
            Action::PromptChoice => Outgoing::plain("Which IP address should be scanned?")
                .with_keyboard([CURRENT_ADDRESS_LABEL, OTHER_ADDRESS_LABEL]),
            Action::SendCaptureLink => Outgoing::markdown(format!(
                "Open this link to capture your current IP: [Capture IP]({})",
                self.capture_link(chat)
            )),
            Action::PromptManualAddress => Outgoing::plain("Send the IPv4 address to scan."),
            Action::InvalidAddress => {
                Outgoing::plain("That does not look like a valid IPv4 address. Try again.")
            }
            Action::Busy => {
                Outgoing::plain("A scan is already running for you. The report will follow.")
            }
            Action::StartScan(request) => {
                info!(chat, address = %request.target, "manual address accepted");
                self.pipeline.spawn(request);
                return Ok(());
            }
            Action::Ignore => return Ok(()),
        };
        self.messenger.send_message(chat, &reply).await
    }

    /// An address captured by the HTTP endpoint for `chat`.
    pub fn capture(&self, chat: ChatId, address: &str) -> CaptureOutcome {
        let outcome = self.controller.capture(chat, address, Instant::now());
        if let CaptureOutcome::Started(request) = &outcome {
            info!(chat, address, "captured address accepted");
            self.pipeline.spawn(request.clone());
        }
        outcome
    }
}
