//! Line grammar for nmap's normal (`-oN`) text output.
//!
//! Every function here is pure and total: unexpected or partial scanner output
//! yields empty views rather than errors, so a sparse report can still be built.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{
    CriticalServiceStatus, OpenPortRecord, ScanFindings, ServiceState, VulnerabilityFinding,
};

/// Ports whose status is always reported, in report order.
pub const WATCH_LIST: &[(u16, &str)] = &[(22, "SSH"), (80, "HTTP"), (443, "HTTPS"), (3389, "RDP")];

/// Registry page for a CVE id; `{id}` is substituted.
pub const CVE_URL_TEMPLATE: &str = "https://cve.mitre.org/cgi-bin/cvename.cgi?name={id}";

static RE_DECORATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[|\\_\-]+\s*").unwrap());
static RE_CVE: Lazy<Regex> = Lazy::new(|| Regex::new(r"CVE-\d{4}-\d+").unwrap());
static RE_OPEN_PORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+/tcp)\s+open\s+(\S+)").unwrap());
static RE_PORT_STATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+/(?:tcp|udp)\s+(?:open|closed|filtered)").unwrap());
static RE_NOT_SHOWN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s+(?:open|closed|filtered)\b").unwrap());
static RE_ALL_SCANNED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^All (\d+) scanned ports on .+ are\b").unwrap());

/// Parse all structured views out of one raw scan output.
pub fn parse_scan_output(raw: &str) -> ScanFindings {
    ScanFindings {
        open_ports: parse_open_ports(raw),
        critical_services: detect_critical_services(raw),
        vulnerabilities: parse_vulnerabilities(raw),
        ports_examined: count_ports_examined(raw),
    }
}

/// Extract vulnerability findings in input order.
///
/// A line qualifies if it contains `CVE` (case-sensitive) or `vulnerable` (any case).
/// Leading list decoration (`|`, `\`, `_`, `-` and whitespace) is stripped, and the
/// first `CVE-YYYY-N` token, if any, becomes the finding's id and registry link.
pub fn parse_vulnerabilities(raw: &str) -> Vec<VulnerabilityFinding> {
    raw.lines()
        .filter(|line| line.contains("CVE") || line.to_lowercase().contains("vulnerable"))
        .map(|line| {
            let description = clean_line(line);
            let cve = RE_CVE.find(&description).map(|m| m.as_str().to_string());
            let link = cve.as_deref().map(cve_link);
            VulnerabilityFinding {
                description,
                cve,
                link,
            }
        })
        .collect()
}

/// Registry URL for a CVE id.
pub fn cve_link(id: &str) -> String {
    CVE_URL_TEMPLATE.replace("{id}", id)
}

fn clean_line(line: &str) -> String {
    RE_DECORATION.replace(line, "").trim().to_string()
}

/// Report open/closed for each watch-listed port.
///
/// This is a plain substring test for `"<port>/tcp open"` over the whole text, so the
/// service and version columns after the state word do not matter.
pub fn detect_critical_services(raw: &str) -> Vec<CriticalServiceStatus> {
    WATCH_LIST
        .iter()
        .map(|&(port, label)| {
            let state = if raw.contains(&format!("{port}/tcp open")) {
                ServiceState::Open
            } else {
                ServiceState::Closed
            };
            CriticalServiceStatus { port, label, state }
        })
        .collect()
}

/// Enumerate `<port>/tcp open <service>` lines. Anything else is skipped.
pub fn parse_open_ports(raw: &str) -> Vec<OpenPortRecord> {
    raw.lines()
        .filter_map(|line| RE_OPEN_PORT.captures(line))
        .map(|caps| OpenPortRecord {
            port: caps[1].to_string(),
            service: caps[2].to_string(),
        })
        .collect()
}

/// Count ports the scanner reported a state for.
///
/// Counts port-table lines whose state is open, closed or filtered (including
/// `open|filtered`), plus the ports nmap folds into `Not shown: N closed ...` lines
/// and the `All N scanned ports on <host> are ...` line it prints when no table follows.
pub fn count_ports_examined(raw: &str) -> u64 {
    raw.lines()
        .map(|line| {
            if RE_PORT_STATE.is_match(line) {
                1
            } else if let Some(rest) = line.trim_start().strip_prefix("Not shown:") {
                RE_NOT_SHOWN
                    .captures_iter(rest)
                    .filter_map(|caps| caps[1].parse::<u64>().ok())
                    .sum()
            } else if let Some(caps) = RE_ALL_SCANNED.captures(line.trim_start()) {
                caps[1].parse::<u64>().unwrap_or(0)
            } else {
                0
            }
        })
        .sum()
}
