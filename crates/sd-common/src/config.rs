use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Process settings read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    /// JSON config file for the dns, identity and iptable sections
    pub config_path: PathBuf,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/etc/splitdns/config.json"),
        }
    }
}

impl EnvConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SPLITDNS_CONFIG") {
            if !v.trim().is_empty() {
                config.config_path = PathBuf::from(v);
            }
        }

        config
    }

    /// Load a `.env` file, then read the environment. Variables already set
    /// win over the file.
    ///
    /// Sets process environment variables, so it must run before any other
    /// thread is started, in particular before the tokio runtime is built.
    pub fn load(env_file: Option<&Path>) -> Self {
        if let Some(path) = env_file {
            load_dotenv(path);
        } else {
            let candidates = [PathBuf::from("/etc/splitdns/.env"), PathBuf::from(".env")];
            for candidate in &candidates {
                if candidate.exists() {
                    load_dotenv(candidate);
                    break;
                }
            }
        }

        Self::from_env()
    }
}

/// Basic `.env` reader (KEY=VALUE per line).
fn load_dotenv(path: &Path) {
    if let Ok(content) = std::fs::read_to_string(path) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim().trim_matches('"').trim_matches('\'');
                if std::env::var(key).is_err() {
                    // SAFETY: `EnvConfig::load` runs while the process is single-threaded
                    unsafe { std::env::set_var(key, value) };
                }
            }
        }
    }
}

/// Parse a JSON config file. A missing file yields `T::default()`; an
/// unreadable or malformed one is an error.
pub fn load_json_or_default<T>(path: &Path) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        info!("No config file at {}, using defaults", path.display());
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        port: u16,
        #[serde(default)]
        name: String,
    }

    #[test]
    fn test_default_path() {
        assert_eq!(EnvConfig::default().config_path, PathBuf::from("/etc/splitdns/config.json"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let sample: Sample = load_json_or_default(&dir.path().join("absent.json")).unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"port": 5353}"#).unwrap();
        let sample: Sample = load_json_or_default(&path).unwrap();
        assert_eq!(sample.port, 5353);
        assert!(sample.name.is_empty());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ port: ").unwrap();
        let err = load_json_or_default::<Sample>(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }

    #[test]
    fn test_dotenv_does_not_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# comment\nSD_TEST_DOTENV_NEW=\"from-file\"\nSD_TEST_DOTENV_SET=from-file\n",
        )
        .unwrap();
        // SAFETY: test-local variable names
        unsafe { std::env::set_var("SD_TEST_DOTENV_SET", "from-env") };

        load_dotenv(&path);
        assert_eq!(std::env::var("SD_TEST_DOTENV_NEW").unwrap(), "from-file");
        assert_eq!(std::env::var("SD_TEST_DOTENV_SET").unwrap(), "from-env");
    }
}
