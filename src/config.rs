use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// scan-report-bot: runs nmap vulnerability scans for chat users and sends back HTML reports.
///
/// Every option can also be set through the environment or a `.env` file.
#[derive(Clone, Parser)]
#[command(name = "scan-report-bot", version, about, long_about = None)]
pub struct Config {
    /// Telegram bot token.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: String,

    /// Port of the address-capture HTTP endpoint.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Interface the HTTP endpoint binds to.
    #[arg(long, env = "BIND_HOST", default_value = "0.0.0.0")]
    pub bind_host: String,

    /// Public base URL of the HTTP endpoint, used in capture links. Defaults to http://127.0.0.1:<port>.
    #[arg(long = "public-url", env = "PROXY_URL")]
    pub public_url: Option<String>,

    /// Directory reports are written to.
    #[arg(long, env = "REPORTS_DIR", default_value = "scans")]
    pub reports_dir: PathBuf,

    /// Directory for the scanner's intermediate output files.
    #[arg(long = "work-dir", env = "SCAN_WORK_DIR", default_value = "scan-output")]
    pub work_dir: PathBuf,

    /// nmap executable.
    #[arg(long = "nmap-bin", env = "NMAP_BIN", default_value = "nmap")]
    pub nmap_bin: PathBuf,

    /// Per-scan timeout in seconds; the scanner is killed when it expires.
    #[arg(long = "scan-timeout-secs", env = "SCAN_TIMEOUT_SECS", default_value_t = 1800)]
    pub scan_timeout_secs: u64,

    /// Max scans running at once.
    #[arg(long = "max-concurrent-scans", env = "MAX_CONCURRENT_SCANS", default_value_t = 4)]
    pub max_concurrent_scans: usize,

    /// Idle seconds before a conversation session is dropped.
    #[arg(long = "session-ttl-secs", env = "SESSION_TTL_SECS", default_value_t = 3600)]
    pub session_ttl_secs: u64,

    /// Geolocation lookup endpoint; the address is appended as a path segment.
    #[arg(long = "geo-endpoint", env = "GEO_ENDPOINT", default_value = "http://ip-api.com/json")]
    pub geo_endpoint: String,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("bind_host", &self.bind_host)
            .field("public_url", &self.public_url())
            .field("reports_dir", &self.reports_dir)
            .field("work_dir", &self.work_dir)
            .field("nmap_bin", &self.nmap_bin)
            .field("scan_timeout_secs", &self.scan_timeout_secs)
            .field("max_concurrent_scans", &self.max_concurrent_scans)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("geo_endpoint", &self.geo_endpoint)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn public_url(&self) -> String {
        self.public_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}", self.port))
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}
