//! Self-contained HTML rendering of a [`ScanReport`] and its on-disk naming.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use time::{format_description::well_known, macros::format_description, OffsetDateTime};
use tokio::io::AsyncWriteExt;

use crate::types::{ScanReport, ServiceState, VulnerabilityFinding};

/// Shown in the vulnerability block when nothing was flagged.
pub const NO_VULNERABILITIES: &str = "No critical vulnerabilities detected.";
/// Shown in the open ports block when the port table is empty.
pub const NO_OPEN_PORTS: &str = "No open ports detected.";

const UNKNOWN: &str = "Unknown";

const STYLE: &str = r#"
        body { font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; margin: 10px; background-color: #f4f4f4; }
        h1 { font-size: 26px; text-align: center; color: #333; margin-bottom: 20px; overflow-wrap: break-word; }
        h2 { font-size: 20px; color: #444; margin-bottom: 10px; }
        .section { background-color: #fff; padding: 15px; margin-bottom: 15px; border-radius: 8px; box-shadow: 0 2px 5px rgba(0, 0, 0, 0.1); }
        p { font-size: 16px; margin: 5px 0; overflow-wrap: break-word; }
        a { color: #007bff; text-decoration: none; font-weight: bold; }
        a:hover { text-decoration: underline; }
        .vulnerabilities { background-color: #fef4f4; padding: 10px; border-radius: 5px; font-size: 15px; line-height: 1.6; overflow-wrap: break-word; }
        .row { display: flex; justify-content: space-between; padding: 10px; background-color: #fafafa; border-radius: 5px; margin-bottom: 5px; }
        .row:nth-child(even) { background-color: #f0f0f0; }
        .cell { font-size: 15px; }
        .open { color: #c0392b; font-weight: bold; }
        .closed { color: #27ae60; }
        footer { font-size: 12px; color: #777; text-align: center; }
        @media (max-width: 768px) {
            h1 { font-size: 22px; }
            p, .cell { font-size: 14px; }
            .section { padding: 10px; }
            .row { flex-direction: column; padding: 8px; }
            .cell { margin-bottom: 5px; }
        }
"#;

/// Escape text for use in HTML element content and quoted attribute values.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

fn or_unknown(s: &str) -> String {
    if s.trim().is_empty() {
        UNKNOWN.to_string()
    } else {
        escape_html(s)
    }
}

/// Render a complete HTML document for the report. Pure; the caller persists it.
pub fn render_html(report: &ScanReport) -> String {
    let geo = &report.geo;
    let findings = &report.findings;
    let address = escape_html(&geo.address);

    let mut html = String::with_capacity(8 * 1024);
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Scan report for {address}</title>
    <style>{STYLE}    </style>
</head>
<body>
    <h1>Scan report for {address}</h1>
"#
    );

    let map = match geo.map_link() {
        Some(link) => format!(
            r#"<a href="{}" target="_blank" rel="noopener">Google Maps</a>"#,
            escape_html(&link)
        ),
        None => UNKNOWN.to_string(),
    };
    let _ = write!(
        html,
        r#"
    <div class="section">
        <h2>Target</h2>
        <p><strong>Country:</strong> {}</p>
        <p><strong>Region:</strong> {}</p>
        <p><strong>City:</strong> {}</p>
        <p><strong>ISP:</strong> {}</p>
        <p><strong>Scan duration:</strong> {} seconds</p>
        <p><strong>Ports examined:</strong> {}</p>
        <p><strong>Map:</strong> {}</p>
    </div>
"#,
        or_unknown(&geo.country),
        or_unknown(&geo.region),
        or_unknown(&geo.city),
        or_unknown(&geo.isp),
        report.duration_secs(),
        findings.ports_examined,
        map,
    );

    html.push_str("\n    <div class=\"section\">\n        <h2>Critical services</h2>\n");
    for service in &findings.critical_services {
        let class = match service.state {
            ServiceState::Open => "open",
            ServiceState::Closed => "closed",
        };
        let _ = write!(
            html,
            r#"        <div class="row">
            <div class="cell"><strong>Port:</strong> {}</div>
            <div class="cell"><strong>Service:</strong> {}</div>
            <div class="cell"><strong>Status:</strong> <span class="{class}">{}</span></div>
        </div>
"#,
            service.port,
            service.label,
            service.state.label(),
        );
    }
    html.push_str("    </div>\n");

    html.push_str("\n    <div class=\"section\">\n        <h2>Open ports</h2>\n");
    if findings.open_ports.is_empty() {
        let _ = writeln!(html, "        <p>{NO_OPEN_PORTS}</p>");
    } else {
        for port in &findings.open_ports {
            let _ = write!(
                html,
                r#"        <div class="row">
            <div class="cell"><strong>Port:</strong> {}</div>
            <div class="cell"><strong>Service:</strong> {}</div>
        </div>
"#,
                escape_html(&port.port),
                escape_html(&port.service),
            );
        }
    }
    html.push_str("    </div>\n");

    html.push_str(
        "\n    <div class=\"section\">\n        <h2>Critical vulnerabilities</h2>\n        <div class=\"vulnerabilities\">\n",
    );
    if findings.vulnerabilities.is_empty() {
        let _ = writeln!(html, "            <p>{NO_VULNERABILITIES}</p>");
    } else {
        for finding in &findings.vulnerabilities {
            let _ = writeln!(html, "            <p>{}</p>", render_finding(finding));
        }
    }
    html.push_str("        </div>\n    </div>\n");

    let generated = report
        .generated_at
        .format(&well_known::Rfc3339)
        .unwrap_or_default();
    let _ = write!(
        html,
        "\n    <footer>Generated {}</footer>\n</body>\n</html>\n",
        escape_html(&generated)
    );
    html
}

/// Finding text with its CVE token turned into a link; everything else escaped.
fn render_finding(finding: &VulnerabilityFinding) -> String {
    let (Some(cve), Some(link)) = (finding.cve.as_deref(), finding.link.as_deref()) else {
        return escape_html(&finding.description);
    };
    match finding.description.split_once(cve) {
        Some((before, after)) => format!(
            r#"{}<a href="{}" target="_blank" rel="noopener">{}</a>{}"#,
            escape_html(before),
            escape_html(link),
            escape_html(cve),
            escape_html(after)
        ),
        None => escape_html(&finding.description),
    }
}

/// File name for a report: `<address>_<timestamp>_report.html`.
///
/// Characters outside `[A-Za-z0-9.-]` in the address become `_`; the timestamp is
/// ISO-8601 UTC with millisecond precision and `-` in place of `:`.
pub fn report_file_name(address: &str, at: OffsetDateTime) -> String {
    let sanitized: String = address
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    let stamp = at
        .to_offset(time::UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]-[minute]-[second].[subsecond digits:3]Z"
        ))
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    format!("{sanitized}_{stamp}_report.html")
}

/// Render and write the report into `dir`. An existing file is never overwritten.
pub async fn write_report(dir: &Path, report: &ScanReport) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create reports directory: {}", dir.display()))?;
    let path = dir.join(report_file_name(&report.geo.address, report.generated_at));
    let body = render_html(report);

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .with_context(|| format!("failed to create report file: {}", path.display()))?;
    file.write_all(body.as_bytes())
        .await
        .with_context(|| format!("failed to write report file: {}", path.display()))?;
    file.flush().await?;
    Ok(path)
}
