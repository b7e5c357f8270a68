//! Forwarding of engine output into tracing.

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, error, info, warn};

/// Where the engine's standard streams go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Inherit the parent's stdout and stderr.
    #[default]
    Inherit,

    /// Pipe both streams and re-emit each line as a tracing event.
    Tracing,
}

/// One line of the engine's structured JSON log.
#[derive(Debug, Deserialize)]
struct LogLine {
    /// Severity: F, E, W, I or D1-D5.
    s: String,

    /// Component.
    #[serde(default)]
    c: String,

    msg: String,

    #[serde(default)]
    attr: Option<serde_json::Value>,
}

#[allow(clippy::cognitive_complexity)]
pub(crate) fn forward_line(node: &str, line: &str) {
    let Ok(parsed) = serde_json::from_str::<LogLine>(line) else {
        info!(target: "mongod", node, "{}", line);
        return;
    };

    let component = parsed.c.as_str();
    let attr = parsed.attr.map(|a| a.to_string()).unwrap_or_default();

    match parsed.s.as_str() {
        "F" | "E" => error!(target: "mongod", node, component, attr = %attr, "{}", parsed.msg),
        "W" => warn!(target: "mongod", node, component, attr = %attr, "{}", parsed.msg),
        s if s.starts_with('D') => debug!(target: "mongod", node, component, attr = %attr, "{}", parsed.msg),
        _ => info!(target: "mongod", node, component, attr = %attr, "{}", parsed.msg),
    }
}

/// Forwards every line of `stream` until EOF.
pub(crate) async fn forward_stream<R>(node: String, stream: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        forward_line(&node, &line);
    }
}
