//! Serve — feed standard input through the parser worker and write one JSON
//! record per completed logical line to standard output.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use crate::conf::AgentConfig;
use crate::parser::{LineProcessor, ParsedLine};
use crate::runtime::stop::shutdown_signal;
use crate::service::{ParserHandle, ParserService, ServiceConfig};

/// Source name for input lines without a `source<TAB>` prefix.
pub const STDIN_SOURCE: &str = "stdin";

/// Split `source<TAB>line`; untagged lines belong to [`STDIN_SOURCE`].
pub fn split_input(raw: &str) -> (&str, &str) {
    raw.split_once('\t').unwrap_or((STDIN_SOURCE, raw))
}

/// Run until stdin closes or a shutdown signal arrives, then drain.
pub async fn serve(
    processor: Arc<LineProcessor>,
    config: AgentConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let service_config = ServiceConfig {
        queue_capacity: config.queue_capacity,
        sweep_interval: Duration::from_secs(config.cache_sweep_interval_secs),
        multiline: config.multiline.clone(),
    };
    let (handle, completed, worker) = ParserService::spawn(Arc::clone(&processor), service_config);

    let writer = tokio::spawn(write_records(completed));

    #[cfg(unix)]
    let reloader = tokio::spawn(reload_on_hangup(handle.clone(), config.clone()));

    info!("Log normalizer is ready, reading from stdin");

    tokio::select! {
        result = read_input(handle.clone()) => {
            if let Err(e) = result {
                error!("Input stream failed: {}", e);
            }
            info!("Input closed");
        }
        _ = shutdown_signal() => {}
    }

    #[cfg(unix)]
    reloader.abort();
    drop(handle);

    worker.await?;
    writer.await?;

    let stats = processor.metrics().snapshot();
    info!(
        total = stats.total_lines,
        matched = stats.matched_lines,
        json = stats.json_lines,
        fallback = stats.fallback_lines,
        dropped = stats.dropped_lines,
        "Log normalizer stopped"
    );
    Ok(())
}

async fn read_input(handle: ParserHandle) -> std::io::Result<()> {
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());

    while let Some(raw) = lines.next().await {
        let raw = raw?;
        let (source, line) = split_input(&raw);
        if handle.submit_line(source, line).await.is_err() {
            warn!("Parser worker stopped, discarding remaining input");
            break;
        }
    }
    Ok(())
}

async fn write_records(mut completed: mpsc::Receiver<ParsedLine>) {
    let mut stdout = tokio::io::stdout();

    while let Some(parsed) = completed.recv().await {
        let Some(record) = parsed.record else {
            continue;
        };
        let mut json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!(source = %parsed.source, "Failed to serialize record: {}", e);
                continue;
            }
        };
        json.push('\n');
        if let Err(e) = stdout.write_all(json.as_bytes()).await {
            error!("Failed to write to stdout: {}", e);
            break;
        }
    }

    let _ = stdout.flush().await;
}

/// Reload pattern files on SIGHUP. A failed reload keeps the current
/// snapshot. The GeoIP locator opened at boot stays in place.
#[cfg(unix)]
async fn reload_on_hangup(handle: ParserHandle, config: AgentConfig) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!("Failed to install SIGHUP handler, hot reload disabled: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("Received SIGHUP, reloading pattern files");
        let reloaded = crate::runtime::boot::load_snapshot(&config).map_err(|e| e.to_string());
        match reloaded {
            Ok(snapshot) => {
                if handle.reload(snapshot).await.is_err() {
                    break;
                }
            }
            Err(e) => error!("Pattern reload failed, keeping current patterns: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tagged_line() {
        assert_eq!(split_input("nginx\tGET /"), ("nginx", "GET /"));
    }

    #[test]
    fn test_split_untagged_line() {
        assert_eq!(split_input("plain text"), (STDIN_SOURCE, "plain text"));
    }

    #[test]
    fn test_split_only_first_tab() {
        assert_eq!(split_input("app\ta\tb"), ("app", "a\tb"));
    }

    #[test]
    fn test_split_empty_source() {
        assert_eq!(split_input("\tline"), ("", "line"));
    }
}
