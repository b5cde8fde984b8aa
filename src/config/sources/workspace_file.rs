//! Workspace config file source: weft.toml and weft.{env}.toml

use config::builder::DefaultState;
use config::{ConfigBuilder, File};
use std::path::Path;
use tracing::debug;

/// Environment name selecting the overlay file; unset means no overlay.
pub const ENV_VAR: &str = "WEFT_ENV";

/// Add workspace config files to builder.
/// Precedence: weft.toml (base) then weft.{WEFT_ENV}.toml (env-specific).
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> ConfigBuilder<DefaultState> {
    let mut builder = builder;

    let base_config_path = workspace_root.join("weft.toml");
    if base_config_path.is_file() {
        debug!(config_path = %base_config_path.display(), "loading workspace configuration");
        builder = builder.add_source(File::from(base_config_path.as_path()).required(false));
    }

    if let Ok(env_name) = std::env::var(ENV_VAR) {
        let env_config_path = workspace_root.join(format!("weft.{}.toml", env_name));
        if env_config_path.is_file() {
            debug!(config_path = %env_config_path.display(), env = %env_name, "loading environment overlay");
            builder = builder.add_source(File::from(env_config_path.as_path()).required(false));
        }
    }

    builder
}
