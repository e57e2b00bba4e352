use portico_mcp::{CustomConfig, ServerConfig, ServerKind, ServerType};
use serde_json::Value;

use crate::entry::{InstallCommand, RegistryEntry, github_repo, is_server_installable};
use crate::error::RegistryError;

/// Lowercase ASCII alphanumerics with single dashes between runs.
fn slug(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for c in id.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "entry".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Config id assigned to servers installed from `entry_id`.
#[must_use]
pub fn registry_server_id(entry_id: &str) -> String {
    format!("registry-{}", slug(entry_id))
}

/// A non-custom template whose config deserializes into that type's payload.
fn builtin_kind(entry: &RegistryEntry) -> Option<ServerKind> {
    let template = entry.template.as_ref()?;
    if template.server_type == ServerType::Custom {
        return None;
    }
    let mut payload = match &template.config {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        _ => return None,
    };
    payload.insert(
        "type".to_owned(),
        Value::String(template.server_type.as_str().to_owned()),
    );
    match serde_json::from_value(Value::Object(payload)) {
        Ok(kind) => Some(kind),
        Err(e) => {
            tracing::debug!(
                entry_id = %entry.id,
                server_type = %template.server_type,
                "template config does not match its type: {e}"
            );
            None
        }
    }
}

fn custom_template_command(entry: &RegistryEntry) -> Option<InstallCommand> {
    let template = entry.template.as_ref()?;
    if template.server_type != ServerType::Custom {
        return None;
    }
    serde_json::from_value::<InstallCommand>(template.config.clone())
        .ok()
        .filter(InstallCommand::is_runnable)
}

fn launch_command(entry: &RegistryEntry) -> Result<InstallCommand, RegistryError> {
    if let Some(install) = entry
        .install_command
        .as_ref()
        .filter(|c| c.is_runnable())
    {
        return Ok(install.clone());
    }
    if let Some(install) = custom_template_command(entry) {
        return Ok(install);
    }
    if let Some(package) = entry.usable_package() {
        let pypi = entry
            .package_registry
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case("pypi"));
        return Ok(if pypi {
            InstallCommand::new("uvx", [package])
        } else {
            InstallCommand::new("npx", ["-y", package])
        });
    }
    if let Some((owner, repo)) = entry
        .repository
        .as_ref()
        .and_then(|r| github_repo(&r.url))
    {
        return Ok(InstallCommand::new(
            "npx",
            ["-y".to_owned(), format!("github:{owner}/{repo}")],
        ));
    }
    Err(RegistryError::NotInstallable {
        id: entry.id.clone(),
        reason: "repository is not a GitHub repository".to_owned(),
    })
}

/// Build a disabled [`ServerConfig`] for `entry`.
///
/// The same entry always yields the same id and payload.
///
/// # Errors
///
/// Returns `RegistryError::NotInstallable` when the entry has neither a usable built-in
/// template nor any launch information.
pub fn convert_to_server_config(entry: &RegistryEntry) -> Result<ServerConfig, RegistryError> {
    let kind = match builtin_kind(entry) {
        Some(kind) => kind,
        None if is_server_installable(entry) || custom_template_command(entry).is_some() => {
            let install = launch_command(entry)?;
            ServerKind::Custom(CustomConfig {
                command: Some(install.command),
                args: install.args,
                env: install.env,
                ..CustomConfig::default()
            })
        }
        None => {
            return Err(RegistryError::NotInstallable {
                id: entry.id.clone(),
                reason: "no install command, package, or repository".to_owned(),
            });
        }
    };

    let mut config = ServerConfig::new(registry_server_id(&entry.id), entry.name.clone(), kind);
    config.registry_id = Some(entry.id.clone());
    tracing::debug!(
        entry_id = %entry.id,
        server_id = %config.id,
        server_type = %config.server_type(),
        "converted registry entry"
    );
    Ok(config)
}
