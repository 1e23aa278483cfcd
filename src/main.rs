//! Exact Online MCP Server
//!
//! Entry point for the MCP server binary. Implements the MCP protocol over
//! stdio using JSON-RPC 2.0; stdout carries protocol traffic, all logging
//! goes to stderr.
//!
//! `exactonline-mcp --authorize` runs the one-time interactive OAuth2 flow;
//! `exactonline-mcp --logout` drops the stored tokens.

use anyhow::Context;
use exactonline_mcp::auth::storage::default_store;
use exactonline_mcp::auth::OAuth2Client;
use exactonline_mcp::config::Config;
use exactonline_mcp::mcp::{
    CallToolParams, CallToolResult, ExactMcpServer, InitializeResult, JsonRpcRequest,
    JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo, ToolsCapability,
};
use exactonline_mcp::odata::ExactClient;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging goes to stderr; MCP uses stdout for protocol traffic.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    let oauth = OAuth2Client::new(&config, default_store());

    match std::env::args().nth(1).as_deref() {
        Some("--authorize") => return authorize(&oauth).await,
        Some("--logout") => {
            oauth.logout().await?;
            eprintln!("Stored tokens removed.");
            return Ok(());
        }
        Some(other) => {
            anyhow::bail!("Unknown argument: {}. Use --authorize or --logout.", other);
        }
        None => {}
    }

    tracing::info!("Starting Exact Online MCP server ({})", config.region);

    let client = Arc::new(ExactClient::new(&config, oauth)?);
    let server = ExactMcpServer::new(client);

    tracing::info!("MCP server ready, listening on stdio");
    run_stdio_loop(server).await
}

/// Interactive console authorization flow.
///
/// Exact Online requires a browser round trip; the user opens the printed
/// URL, approves access, and pastes the redirect URL back here.
async fn authorize(oauth: &OAuth2Client) -> anyhow::Result<()> {
    let (url, expected_state) = oauth.authorization_url();

    eprintln!("Open this URL in a browser and approve access:\n");
    eprintln!("  {}\n", url);
    eprintln!("After approving you will be redirected to a URL that may not load.");
    eprintln!("Paste that full redirect URL here and press enter:");

    let mut line = String::new();
    BufReader::new(io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read redirect URL")?;

    let redirect = url::Url::parse(line.trim()).context("that is not a valid URL")?;
    let mut code = None;
    let mut state = None;
    for (key, value) in redirect.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    let code = code.context("redirect URL contains no authorization code")?;
    if state.as_deref() != Some(expected_state.as_str()) {
        anyhow::bail!("state mismatch; restart the authorization flow");
    }

    oauth.exchange_code(&code).await?;
    eprintln!("Authorization complete. Tokens stored.");
    Ok(())
}

async fn run_stdio_loop(server: ExactMcpServer) -> anyhow::Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        tracing::debug!("Received: {}", line);

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                let response = JsonRpcResponse::error(None, -32700, &format!("Parse error: {}", e));
                send_response(&mut stdout, &response).await?;
                continue;
            }
        };

        let response = handle_request(&server, request).await;
        send_response(&mut stdout, &response).await?;
    }

    Ok(())
}

async fn handle_request(server: &ExactMcpServer, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();

    match request.method.as_str() {
        "initialize" => {
            let result = InitializeResult {
                protocol_version: "2024-11-05".to_string(),
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability {
                        list_changed: Some(false),
                    }),
                },
                server_info: ServerInfo {
                    name: "exactonline-mcp".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            };
            JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
        }

        // Notification; acknowledged to keep simple clients happy.
        "initialized" => JsonRpcResponse::success(id, serde_json::json!({})),

        "tools/list" => {
            let result = ListToolsResult {
                tools: ExactMcpServer::get_tools(),
            };
            JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
        }

        "tools/call" => {
            let params: CallToolParams = match request.params {
                Some(p) => match serde_json::from_value(p) {
                    Ok(params) => params,
                    Err(e) => {
                        return JsonRpcResponse::error(id, -32602, &format!("Invalid params: {}", e))
                    }
                },
                None => return JsonRpcResponse::error(id, -32602, "Missing params"),
            };

            let args = params.arguments.unwrap_or_default();
            let result: CallToolResult = server.call_tool(&params.name, &args).await;
            JsonRpcResponse::success(id, serde_json::to_value(result).unwrap_or_default())
        }

        "ping" => JsonRpcResponse::success(id, serde_json::json!({})),

        _ => JsonRpcResponse::error(id, -32601, &format!("Method not found: {}", request.method)),
    }
}

async fn send_response(stdout: &mut io::Stdout, response: &JsonRpcResponse) -> anyhow::Result<()> {
    let json = serde_json::to_string(response)?;
    tracing::debug!("Sending: {}", json);
    stdout.write_all(json.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}
