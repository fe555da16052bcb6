//! Turns configured server paths into [`ServerRegistration`]s.
//!
//! A `.json` path is read as a server descriptor. Any other path is a worker
//! script: a sibling `<stem>.json` descriptor wins if present, otherwise the
//! launch command is inferred from the file extension.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::core::tool::{Namespace, ServerRegistration, Tool};

/// Errors raised while resolving a configured server path.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DiscoveryError {
    #[error("Server path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid server descriptor {}: {source}", .path.display())]
    InvalidDescriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Server descriptor {} has no command", .0.display())]
    MissingCommand(PathBuf),
}

/// On-disk server descriptor.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerDescriptor {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    tools: Vec<Tool>,
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Launch command for a worker script, chosen by extension.
pub fn infer_launch(path: &Path) -> (String, Vec<String>) {
    let script = path.to_string_lossy().into_owned();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("py") => ("python3".to_string(), vec![script]),
        Some("js") | Some("mjs") | Some("cjs") => ("node".to_string(), vec![script]),
        Some("ts") => ("npx".to_string(), vec!["tsx".to_string(), script]),
        Some("sh") => ("sh".to_string(), vec![script]),
        Some("rb") => ("ruby".to_string(), vec![script]),
        _ => (script, Vec::new()),
    }
}

fn read_descriptor(path: &Path) -> Result<ServerDescriptor, DiscoveryError> {
    let raw = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| DiscoveryError::InvalidDescriptor {
        path: path.to_path_buf(),
        source,
    })
}

fn from_descriptor(
    descriptor: ServerDescriptor,
    descriptor_path: &Path,
    default_id: String,
    namespace: Namespace,
) -> Result<ServerRegistration, DiscoveryError> {
    if descriptor.command.trim().is_empty() {
        return Err(DiscoveryError::MissingCommand(descriptor_path.to_path_buf()));
    }
    let id = descriptor.id.unwrap_or(default_id);
    let display_name = descriptor.display_name.unwrap_or_else(|| id.clone());
    Ok(ServerRegistration {
        id,
        display_name,
        launch_command: descriptor.command,
        launch_args: descriptor.args,
        env: descriptor.env,
        namespace,
        tools: descriptor.tools,
    })
}

/// Resolve one configured path into a registration in `namespace`.
pub fn discover_server(path: &Path, namespace: Namespace) -> Result<ServerRegistration, DiscoveryError> {
    if !path.exists() {
        return Err(DiscoveryError::NotFound(path.to_path_buf()));
    }
    let stem = file_stem(path);

    let is_descriptor = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_descriptor {
        let descriptor = read_descriptor(path)?;
        return from_descriptor(descriptor, path, stem, namespace);
    }

    let sibling = path.with_extension("json");
    if sibling.is_file() {
        tracing::debug!(script = %path.display(), descriptor = %sibling.display(), "Using sibling descriptor");
        let descriptor = read_descriptor(&sibling)?;
        return from_descriptor(descriptor, &sibling, stem, namespace);
    }

    let (command, args) = infer_launch(path);
    Ok(ServerRegistration::builder(stem, namespace)
        .command(command)
        .args(args)
        .build())
}

/// Resolve every path; failures are returned alongside the successes so the
/// caller can log them and continue.
pub fn discover_servers(
    paths: &[String],
    namespace: Namespace,
) -> (Vec<ServerRegistration>, Vec<DiscoveryError>) {
    let mut servers = Vec::new();
    let mut errors = Vec::new();
    for path in paths {
        match discover_server(Path::new(path), namespace) {
            Ok(server) => servers.push(server),
            Err(e) => errors.push(e),
        }
    }
    (servers, errors)
}
