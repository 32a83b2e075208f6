//! Command-line front end of the client runtime.

use anyhow::{bail, Context};
use mcplink_client::{
    ConnectOutcome, ConnectionEvent, ConnectionManager, ConnectionStore, EventKind, HttpGateway,
    ToolCallParams, ToolExecutor,
};
use mcplink_core::{Config, ServerTarget};
use mcplink_mcp::ToolContent;
use mcplink_storage::JsonStorage;
use std::path::PathBuf;
use std::sync::Arc;

fn data_dir(config: &Config) -> anyhow::Result<PathBuf> {
    config
        .client
        .as_ref()
        .and_then(|c| c.data_dir.clone())
        .or_else(mcplink_util::paths::client_data_dir)
        .context("Could not determine client data directory")
}

fn gateway(config: &Config) -> anyhow::Result<HttpGateway> {
    let client = config.client.clone().unwrap_or_default();
    let server_url = client.server_url.unwrap_or_else(|| config.public_url());
    Ok(HttpGateway::new(server_url, client.api_token)?)
}

fn store(config: &Config) -> anyhow::Result<ConnectionStore<JsonStorage>> {
    let storage = JsonStorage::new(data_dir(config)?);
    Ok(ConnectionStore::new(Arc::new(storage)).with_retention(config.retention()))
}

fn manager(config: &Config) -> anyhow::Result<ConnectionManager<JsonStorage>> {
    let manager = ConnectionManager::new(Arc::new(gateway(config)?), store(config)?);
    manager.on(EventKind::All, print_event);
    Ok(manager)
}

fn print_event(event: &ConnectionEvent) {
    match (&event.error, event.tool_count) {
        (Some(error), _) => eprintln!("[{}] {}: {}", event.server_name, event.phase, error),
        (None, Some(count)) => {
            eprintln!("[{}] {} ({} tools)", event.server_name, event.phase, count)
        }
        (None, None) => eprintln!("[{}] {}", event.server_name, event.phase),
    }
}

fn report(outcome: ConnectOutcome, target: &ServerTarget) {
    match outcome {
        ConnectOutcome::Connected { session_id, tools } => {
            println!("Connected to {} (session {})", target.server_name, session_id);
            for tool in tools {
                match tool.description {
                    Some(description) => println!("  {} - {}", tool.name, description),
                    None => println!("  {}", tool.name),
                }
            }
        }
        ConnectOutcome::RequiresAuth {
            session_id,
            authorization_url,
        } => {
            println!("Authorize {} in your browser:", target.server_name);
            println!("  {authorization_url}");
            println!();
            println!("Then finish with:");
            println!(
                "  mcplink resume --id {} --name {} --url {} --transport {} --session {}",
                target.server_id,
                target.server_name,
                target.server_url,
                target.transport,
                session_id
            );
        }
    }
}

pub async fn connect(config: &Config, target: ServerTarget) -> anyhow::Result<()> {
    let outcome = manager(config)?
        .connect(target.clone())
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    report(outcome, &target);
    Ok(())
}

pub async fn resume(
    config: &Config,
    target: ServerTarget,
    session_id: String,
) -> anyhow::Result<()> {
    let outcome = manager(config)?
        .resume(target.clone(), session_id)
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;
    report(outcome, &target);
    Ok(())
}

pub async fn call(
    config: &Config,
    server_name: String,
    tool_name: String,
    args: &str,
) -> anyhow::Result<()> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be valid JSON")?;
    let executor = ToolExecutor::new(manager(config)?);

    let result = executor
        .execute_tool_call(ToolCallParams::new(server_name, tool_name, arguments))
        .await?;

    for content in &result.content {
        match content {
            ToolContent::Text { text } => println!("{text}"),
            other => println!("{}", serde_json::to_string(other)?),
        }
    }
    if result.is_error {
        bail!("Tool reported an error");
    }
    Ok(())
}

pub async fn sessions(config: &Config, json: bool) -> anyhow::Result<()> {
    use mcplink_client::SessionGateway;

    let sessions = gateway(config)?.list_sessions().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  {:<20} {:<15} {}  {}",
            session.session_id,
            session.server_name,
            session.connection_status.as_str(),
            if session.active { "active" } else { "inactive" },
            session.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub async fn status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = store(config)?;
    store.purge_expired().await?;
    let records = store.all().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("No cached connections.");
        return Ok(());
    }
    for record in records {
        println!(
            "{:<20} {:<15} {:>3} tools  {}",
            record.server_name,
            record.connection_status.as_str(),
            record.tools.len(),
            if record.session_id.is_empty() {
                "-"
            } else {
                record.session_id.as_str()
            }
        );
        if let Some(error) = record.error {
            println!("  error: {error}");
        }
    }
    Ok(())
}

pub async fn disconnect(config: &Config, session_id: &str) -> anyhow::Result<()> {
    if manager(config)?.disconnect(session_id).await? {
        println!("Disconnected {session_id}");
    } else {
        println!("Session not found: {session_id}");
    }
    Ok(())
}
