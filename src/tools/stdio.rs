//! A line-delimited JSON-RPC-shaped stdio reader (§6.1 closing note: wire
//! encoding beyond the dispatch table itself is out of scope). One request
//! object per line; not a framed or batched transport.

use super::ToolDispatcher;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: serde_json::Value,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<crate::error::ErrorResponse>,
}

/// Reads one JSON request per line from `stdin`, dispatches it, and writes
/// one JSON response per line to `stdout`. Runs until stdin closes.
pub async fn serve_stdio(dispatcher: &ToolDispatcher) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(req) => match dispatcher.dispatch(&req.method, req.params).await {
                Ok(result) => RpcResponse { id: req.id, result: Some(result), error: None },
                Err(err) => RpcResponse { id: req.id, result: None, error: Some((&err).into()) },
            },
            Err(err) => {
                warn!(%err, %line, "malformed tool request line");
                RpcResponse {
                    id: serde_json::Value::Null,
                    result: None,
                    error: Some(crate::error::ErrorResponse {
                        kind: crate::error::ErrorKind::InvalidState,
                        message: format!("malformed request: {err}"),
                    }),
                }
            }
        };
        let mut out = serde_json::to_string(&response).expect("RpcResponse always serializes");
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
