//! Line-delimited JSON bridge to the touch front-end.
//!
//! Each input line is `{ "id", "cmd", "payload" }`; each output line is
//! `{ "id", "ok" }` or `{ "id", "error" }`. Requests run concurrently, so
//! replies can arrive out of order and are matched by `id`. Pushed events,
//! such as order panel countdown ticks, are written as `{ "event", "payload" }`
//! lines on the same stream.

use anyhow::Context;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::commands::{dispatch, AppState};

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    cmd: String,
    #[serde(default)]
    payload: Value,
}

fn reply(id: Value, result: Result<Value, String>) -> Value {
    match result {
        Ok(ok) => json!({ "id": id, "ok": ok }),
        Err(error) => json!({ "id": id, "error": error }),
    }
}

/// Serve requests from `reader` until EOF, then wait for the ones still
/// running before returning.
pub async fn serve<R, W>(state: Arc<AppState>, reader: R, writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Value>(64);
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(msg) = rx.recv().await {
            let mut line = msg.to_string();
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });
    state.attach_events(tx.clone());

    let mut running = JoinSet::new();
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("reading bridge input")? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "malformed bridge request");
                let _ = tx.send(reply(Value::Null, Err(format!("Invalid request: {e}")))).await;
                continue;
            }
        };
        debug!(id = %request.id, cmd = %request.cmd, "bridge request");
        let state = state.clone();
        let tx = tx.clone();
        running.spawn(async move {
            let result = dispatch(&state, &request.cmd, request.payload).await;
            // The writer only goes away on shutdown.
            let _ = tx.send(reply(request.id, result)).await;
        });
    }

    while running.join_next().await.is_some() {}
    // Stopped tickers release their clones of the writer channel.
    state.detach_events();
    drop(tx);
    writer_task
        .await
        .context("bridge writer panicked")?
        .context("writing bridge output")?;
    info!("bridge input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::offline_state;
    use tokio::io::BufReader;

    async fn run_lines(input: &str) -> Vec<Value> {
        let state = Arc::new(offline_state(Vec::new()));
        let (client, server) = tokio::io::duplex(64 * 1024);
        serve(state, BufReader::new(input.as_bytes()), server).await.unwrap();

        let mut out = Vec::new();
        let mut lines = BufReader::new(client).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(serde_json::from_str(&line).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn replies_are_matched_by_id() {
        let input = concat!(
            r#"{"id":1,"cmd":"app_about"}"#,
            "\n\n",
            r#"{"id":"x","cmd":"no_such_command","payload":{}}"#,
            "\n",
            "not json\n",
        );
        let mut out = run_lines(input).await;
        out.sort_by_key(|v| v["id"].to_string());

        assert_eq!(out.len(), 3);
        let about = out.iter().find(|v| v["id"] == 1).unwrap();
        assert!(about["ok"]["version"].is_string());
        let unknown = out.iter().find(|v| v["id"] == "x").unwrap();
        assert_eq!(unknown["error"], "Unknown command: no_such_command");
        let malformed = out.iter().find(|v| v["id"].is_null()).unwrap();
        assert!(malformed["error"].as_str().unwrap().starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn watch_sees_the_bridge_event_channel() {
        let input = concat!(r#"{"id":7,"cmd":"order_panel_watch","payload":{"orderId":"o9"}}"#, "\n");
        let out = run_lines(input).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["error"], "Order o9 is not open");
    }
}
