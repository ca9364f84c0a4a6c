//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.skillflow/` in
//! production) and deserializes it into [`EngineConfig`]. Falls back to
//! defaults when the file is missing or malformed.

use std::path::{Path, PathBuf};

use skillflow_types::config::EngineConfig;

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}

/// Directory scanned for workflow files.
///
/// `skills_dir` from the config wins; otherwise `{data_dir}/skills`.
pub fn resolve_skills_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    config
        .skills_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("skills"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_tool_timeout_secs, 60);
        assert!(config.tools.is_empty());
    }

    #[tokio::test]
    async fn test_load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
default_tool_timeout_secs = 10
cancel_grace_secs = 1

[[tools]]
type = "command"
name = "say"
program = "echo"

[[auto_heal]]
name = "relogin"
kinds = ["auth"]
remediation = { tool = "say" }
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_tool_timeout_secs, 10);
        assert_eq!(config.cancel_grace_secs, 1);
        assert_eq!(config.tools[0].name(), "say");
        assert_eq!(config.auto_heal[0].max_attempts, 1);
    }

    #[tokio::test]
    async fn test_load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.transform_timeout_ms, 2_000);
    }

    #[test]
    fn test_skills_dir_defaults_under_data_dir() {
        let data_dir = PathBuf::from("/home/user/.skillflow");
        let mut config = EngineConfig::default();
        assert_eq!(
            resolve_skills_dir(&config, &data_dir),
            PathBuf::from("/home/user/.skillflow/skills")
        );
        config.skills_dir = Some(PathBuf::from("/srv/skills"));
        assert_eq!(resolve_skills_dir(&config, &data_dir), PathBuf::from("/srv/skills"));
    }
}
