//! `[env]` table from `$XDG_CONFIG_HOME/<app>/config.toml`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

fn config_path(app_name: &str) -> Option<PathBuf> {
    // Explicit XDG_CONFIG_HOME first so tests and containers can redirect it.
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(dirs::config_dir)?;
    let path = base.join(app_name).join("config.toml");
    path.is_file().then_some(path)
}

/// Env pairs from the `[env]` table. Missing file or section yields an empty
/// map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = config_path(app_name) else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let config: ConfigFile = toml::from_str(&content)?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_xdg_home<T>(dir: &std::path::Path, body: impl FnOnce() -> T) -> T {
        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", dir);
        let result = body();
        match prev {
            Some(value) => env::set_var("XDG_CONFIG_HOME", value),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        result
    }

    /// **Scenario**: Missing config file yields an empty map.
    #[test]
    fn missing_file_is_empty() {
        let map = load_env_map("heddle-xdg-test-nonexistent").unwrap();
        assert!(map.is_empty());
    }

    /// **Scenario**: The [env] table is read; other tables are ignored.
    #[test]
    fn reads_env_table() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("heddle-xdg-app");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[other]\nignored = \"x\"\n[env]\nFOO = \"bar\"\n",
        )
        .unwrap();

        let map = with_xdg_home(dir.path(), || load_env_map("heddle-xdg-app")).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("FOO").map(String::as_str), Some("bar"));
    }

    /// **Scenario**: Invalid TOML surfaces as XdgParse.
    #[test]
    fn invalid_toml_fails() {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join("heddle-xdg-bad");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "nope [[[\n").unwrap();

        let result = with_xdg_home(dir.path(), || load_env_map("heddle-xdg-bad"));
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
