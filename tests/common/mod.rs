#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use scan_report_bot::conversation::ConversationController;
use scan_report_bot::executor::{ScanError, ScanOutput, ScanTool};
use scan_report_bot::geo::GeoLocator;
use scan_report_bot::intake::Intake;
use scan_report_bot::messenger::{Messenger, Outgoing};
use scan_report_bot::pipeline::Pipeline;
use scan_report_bot::types::{ChatId, GeoInfo};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const SAMPLE_OUTPUT: &str = "\
# Nmap 7.94 scan initiated as: nmap --script vuln -oN out.nmap 1.2.3.4
Nmap scan report for 1.2.3.4
Host is up (0.012s latency).
Not shown: 998 closed tcp ports (reset)
PORT   STATE SERVICE
22/tcp open ssh
80/tcp closed http
|_http-vuln-cve2021-41773: VULNERABLE: CVE-2021-41773
";

pub struct FakeScanner {
    raw: String,
    fail: bool,
    hold: bool,
    release: Notify,
    calls: AtomicUsize,
}

impl FakeScanner {
    pub fn returning(raw: &str) -> Arc<Self> {
        Arc::new(Self {
            raw: raw.to_string(),
            fail: false,
            hold: false,
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            raw: String::new(),
            fail: true,
            hold: false,
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    /// A scanner that blocks until [`FakeScanner::release`] is called.
    pub fn held(raw: &str) -> Arc<Self> {
        Arc::new(Self {
            raw: raw.to_string(),
            fail: false,
            hold: true,
            release: Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanTool for FakeScanner {
    async fn run(&self, _target: &str, _cancel: CancellationToken) -> Result<ScanOutput, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hold {
            self.release.notified().await;
        }
        if self.fail {
            return Err(ScanError::Failed {
                status: "exit status: 1".into(),
                stderr: "boom".into(),
            });
        }
        Ok(ScanOutput {
            raw: self.raw.clone(),
            duration: Duration::from_millis(12_340),
        })
    }
}

pub struct FakeGeo {
    pub fail: bool,
}

#[async_trait]
impl GeoLocator for FakeGeo {
    async fn lookup(&self, address: &str) -> Result<GeoInfo> {
        if self.fail {
            bail!("lookup service unreachable");
        }
        Ok(GeoInfo {
            address: address.to_string(),
            country: "France".into(),
            region: "Ile-de-France".into(),
            city: "Paris".into(),
            isp: "Example Telecom".into(),
            latitude: Some(48.85),
            longitude: Some(2.35),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(ChatId, Outgoing),
    Document(ChatId, PathBuf),
}

#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<Sent>>,
    /// When set, text messages are rejected and not recorded; documents still go through.
    pub reject_texts: AtomicBool,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(_, m) => Some(m.text),
                Sent::Document(..) => None,
            })
            .collect()
    }

    pub fn documents(&self) -> Vec<PathBuf> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Document(_, p) => Some(p),
                Sent::Text(..) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, chat: ChatId, message: &Outgoing) -> Result<()> {
        if self.reject_texts.load(Ordering::SeqCst) {
            bail!("Telegram API error: Too Many Requests: retry after 5");
        }
        self.sent.lock().unwrap().push(Sent::Text(chat, message.clone()));
        Ok(())
    }

    async fn send_document(&self, chat: ChatId, path: &Path) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Document(chat, path.to_path_buf()));
        Ok(())
    }
}

pub struct Harness {
    pub scanner: Arc<FakeScanner>,
    pub messenger: Arc<RecordingMessenger>,
    pub controller: Arc<ConversationController>,
    pub pipeline: Arc<Pipeline>,
    pub intake: Arc<Intake>,
    pub reports: tempfile::TempDir,
}

impl Harness {
    pub fn new(scanner: Arc<FakeScanner>, geo_fails: bool) -> Self {
        let reports = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let controller = Arc::new(ConversationController::new(Duration::from_secs(3600)));
        let pipeline = Arc::new(Pipeline::new(
            scanner.clone(),
            Arc::new(FakeGeo { fail: geo_fails }),
            messenger.clone(),
            controller.clone(),
            reports.path(),
            CancellationToken::new(),
        ));
        let intake = Arc::new(Intake::new(
            controller.clone(),
            messenger.clone(),
            pipeline.clone(),
            "https://bot.example.org/",
        ));
        Self {
            scanner,
            messenger,
            controller,
            pipeline,
            intake,
            reports,
        }
    }

    /// Wait (bounded) until `cond` holds.
    pub async fn wait_until(&self, cond: impl Fn(&Self) -> bool) {
        for _ in 0..200 {
            if cond(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }
}
