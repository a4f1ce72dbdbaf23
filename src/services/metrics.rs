// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 ® John Hauger Mitander <john@on1.no>

use crate::services::twap::TwapStats;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Serve `TwapStats` as Prometheus text on `/` and as JSON on `/stats` until `shutdown` fires.
pub async fn spawn_metrics_server(
    port: u16,
    stats: Arc<TwapStats>,
    shutdown: CancellationToken,
) -> Option<SocketAddr> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!("Metrics server failed to bind: {}", e);
            return None;
        }
    };

    let local = listener.local_addr().ok();
    if let Some(addr) = local {
        tracing::info!("Metrics server listening on {}", addr);
    }

    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((mut socket, _)) => {
                    let mut buf = [0u8; 1024];
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    let req = String::from_utf8_lossy(&buf[..n]).to_string();
                    let path = req
                        .lines()
                        .next()
                        .and_then(|l| l.split_whitespace().nth(1))
                        .unwrap_or("/");

                    let (content_type, body) = if path.starts_with("/stats") {
                        ("application/json", render_json(&stats))
                    } else {
                        ("text/plain; version=0.0.4", render_metrics(&stats))
                    };
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        content_type,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                }
                Err(e) => {
                    tracing::warn!("Metrics accept error: {}", e);
                    continue;
                }
            }
        }
    });

    local
}

fn render_metrics(stats: &TwapStats) -> String {
    let s = stats.snapshot();
    let counters = [
        ("twap_ticks_total", s.ticks),
        ("twap_tranches_executed_total", s.executed),
        ("twap_tranches_filled_total", s.filled),
        ("twap_tranches_deferred_total", s.deferred),
        ("twap_tranches_failed_total", s.failed),
        ("twap_tranches_expired_total", s.expired),
        ("twap_tranches_skipped_total", s.skipped),
        ("twap_rebroadcasts_total", s.rebroadcast),
    ];
    let mut body = String::new();
    for (name, value) in counters {
        body.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
    }
    body
}

fn render_json(stats: &TwapStats) -> String {
    serde_json::to_string(&stats.snapshot()).unwrap_or_else(|_| "{}".to_string())
}
