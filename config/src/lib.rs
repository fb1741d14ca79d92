//! Load configuration from XDG `config.toml` and project `.env`, then apply
//! to the process environment with priority: **existing env > .env > XDG**.
//!
//! Deployments keep secrets in the environment, developers keep local
//! overrides in `.env`, and durable defaults live in
//! `$XDG_CONFIG_HOME/<app_name>/config.toml` under an `[env]` table.

mod env_file;
mod xdg;

use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from XDG `config.toml` and an optional project `.env`, then
/// sets environment variables only for keys that are **not** already set.
///
/// When a key is missing from the process environment, precedence is:
/// 1. Value from project `.env` (current directory, or `override_dir`)
/// 2. Value from `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table
///
/// * `app_name`: e.g. `"heddle"`; selects `~/.config/<app_name>/config.toml`.
/// * `override_dir`: look for `.env` here instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg::load_env_map(app_name)?;
    let dotenv_map = env_file::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    for (key, value) in layered(&dotenv_map, &xdg_map) {
        if std::env::var(&key).is_err() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}

/// Merges both sources, `.env` winning on key collisions.
fn layered(
    dotenv_map: &std::collections::HashMap<String, String>,
    xdg_map: &std::collections::HashMap<String, String>,
) -> std::collections::HashMap<String, String> {
    let mut merged = xdg_map.clone();
    for (key, value) in dotenv_map {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
