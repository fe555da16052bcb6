use std::path::Path;

use config::{Config, Environment, File, FileFormat, Map};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix of environment variables overriding file settings.
pub const ENV_PREFIX: &str = "TOOLGATE";

/// Load configuration from an optional file layered under `TOOLGATE_*`
/// environment variables. Supports YAML, JSON and TOML files.
pub fn load_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    build_config(config_path, None)
}

/// Like [`load_config`] but reads overrides from `env` instead of the process
/// environment.
pub fn load_config_with_env(
    config_path: Option<&str>,
    env: Map<String, String>,
) -> Result<GatewayConfig> {
    build_config(config_path, Some(env))
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Toml,
    }
}

fn build_config(
    config_path: Option<&str>,
    env: Option<Map<String, String>>,
) -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        if !path.exists() {
            eyre::bail!("Configuration file '{}' not found", path.display());
        }
        builder = builder.add_source(File::new(config_path, file_format(path)));
    }

    let environment = Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("ext_servers")
        .with_list_parse_key("app_servers")
        .source(env);

    let settings = builder
        .add_source(environment)
        .build()
        .with_context(|| match config_path {
            Some(path) => format!("Failed to build config from {path}"),
            None => "Failed to build config from environment".to_string(),
        })?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .wrap_err("Failed to deserialize gateway configuration")?;

    Ok(gateway_config)
}
