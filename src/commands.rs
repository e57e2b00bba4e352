use anyhow::Context;
use portico_core::Services;
use portico_core::servers::{load_servers, save_servers, upsert};
use portico_mcp::{ConnectionState, ErrorRecord};
use portico_registry::{SearchRequest, SearchResult};
use tokio::sync::broadcast::error::TryRecvError;

use crate::cli::Command;

pub(crate) async fn run(services: &Services, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Search {
            query,
            tags,
            category,
            page,
            limit,
            offline,
            json,
        } => {
            let mut request = SearchRequest::new().page(page).limit(limit);
            request.query = query;
            request.category = category;
            request.tags = tags;
            if offline {
                request = request.offline();
            }
            let result = services.registry.search(request).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_search(&result);
            }
        }
        Command::Sync => {
            let stats = services
                .registry
                .prefetch()
                .await
                .context("registry sync failed")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Show { entry_id } => {
            let entry = services.registry.entry_details(&entry_id).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
            println!(
                "installable: {}",
                services.registry.is_server_installable(&entry)
            );
        }
        Command::Install { entry_id, save } => {
            let entry = services.registry.entry_details(&entry_id).await?;
            let config = services.registry.convert_to_server_config(&entry)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                let path = &services.config.servers_path;
                let mut servers = load_servers(path).await?;
                let id = config.id.clone();
                let replaced = upsert(&mut servers, config);
                save_servers(path, &servers).await?;
                let verb = if replaced { "updated" } else { "added" };
                println!("{verb} '{id}' in {}", path.display());
            }
        }
        Command::Servers => {
            services.load_servers().await?;
            let ids = services.manager.server_ids().await;
            if ids.is_empty() {
                println!("no servers configured");
            }
            for id in ids {
                let config = services.manager.config(&id).await?;
                let state = services.manager.state(&id).await?;
                println!(
                    "{id:<28} {:<11} {:<9} {}",
                    config.server_type().to_string(),
                    if config.enabled { "enabled" } else { "disabled" },
                    state
                );
            }
        }
        Command::Connect { server_id } => {
            services.load_servers().await?;
            let mut events = services.manager.subscribe_state();
            let state = services
                .manager
                .connect(&server_id)
                .await
                .with_context(|| format!("failed to connect '{server_id}'"))?;

            loop {
                match events.try_recv() {
                    Ok(event) if event.server_id == server_id => {
                        println!("{} -> {}", event.from, event.to);
                    }
                    Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }

            if state == ConnectionState::Ready {
                let snapshot = services.manager.tools(&server_id).await?;
                println!("{} tool(s):", snapshot.len());
                for tool in &snapshot.tools {
                    println!("  {:<24} {}", tool.name, tool.description);
                }
            } else if let Some(record) = services
                .manager
                .error_history(&server_id)
                .await?
                .into_iter()
                .next()
            {
                print_error(&record);
            }
            services.manager.shutdown().await;
        }
        Command::Test { server_id } => {
            services.load_servers().await?;
            let report = services.manager.test(&server_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Some(record) = &report.error {
                print_error(record);
            }
        }
    }
    Ok(())
}

fn print_search(result: &SearchResult) {
    for entry in &result.entries {
        let category = entry.category.as_deref().unwrap_or("-");
        println!("{:<24} {:<14} {}", entry.id, category, entry.description);
    }
    println!(
        "{} of {} result(s) from {}{}",
        result.entries.len(),
        result.total,
        result.source,
        if result.has_more { ", more available" } else { "" }
    );
}

fn print_error(record: &ErrorRecord) {
    println!("{} [{}]: {}", record.error_type, record.code, record.message);
    for step in &record.remediation_steps {
        println!("  - {step}");
    }
}
