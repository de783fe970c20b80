// JavaScript debugger MCP server
//
// Exposes the jsdebug engine (sandboxed runs, breakpoints, stepping, watches)
// as Model Context Protocol tools over stdio

use anyhow::Result;
use jsdebug_engine::{EngineConfig, ExecutionEngine};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tracing::{debug, error, info};

mod event_log;
mod handlers;
mod protocol;
mod tools;

use handlers::RequestHandler;
use protocol::*;

async fn send(stdout: &mut Stdout, response: &JsonRpcResponse) -> Result<()> {
    let response_str = serde_json::to_string(response)?;
    debug!("Sending: {}", response_str);
    stdout.write_all(response_str.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing to stderr only - stdout is reserved for JSON-RPC protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jsdebug_mcp=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting jsdebug MCP server...");

    let config = EngineConfig::from_env();
    debug!("Engine config: {:?}", config);
    let engine = ExecutionEngine::new(config);
    engine.initialize()?;

    let handler = RequestHandler::new(engine.clone());

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    info!("jsdebug MCP server ready, waiting for requests...");

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                info!("Client disconnected");
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                debug!("Received: {}", line);

                let value = match serde_json::from_str::<Value>(line) {
                    Ok(value) => value,
                    Err(e) => {
                        error!("Parse error: {}", e);
                        let response = JsonRpcResponse::failure(
                            Value::Null,
                            JsonRpcError::new(PARSE_ERROR, "Parse error"),
                        );
                        send(&mut stdout, &response).await?;
                        continue;
                    }
                };

                // Requests carry an id, notifications don't
                if value.get("id").is_some() {
                    let response = match serde_json::from_value::<JsonRpcRequest>(value) {
                        Ok(request) => handler.handle_request(request).await,
                        Err(e) => {
                            error!("Invalid request: {}", e);
                            JsonRpcResponse::failure(
                                Value::Null,
                                JsonRpcError::new(INVALID_REQUEST, "Invalid request"),
                            )
                        }
                    };
                    send(&mut stdout, &response).await?;
                } else {
                    match serde_json::from_value::<JsonRpcNotification>(value) {
                        Ok(notification) => handler.handle_notification(notification).await,
                        Err(e) => error!("Invalid notification: {}", e),
                    }
                }
            }
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }
    }

    engine.dispose().await;
    info!("jsdebug MCP server shutting down");
    Ok(())
}
