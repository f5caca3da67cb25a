use crate::auth::AuthScheme;
use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolved client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: Url,
    pub auth_scheme: AuthScheme,
    pub request_timeout: Duration,
    /// Where the persisted session record lives.
    pub data_dir: PathBuf,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to read {path}: {detail}")]
    Unreadable { path: String, detail: String },
    #[error("invalid lexis.yaml: {0}")]
    Malformed(String),
    #[error("invalid value for {key}: {detail}")]
    InvalidValue { key: &'static str, detail: String },
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Unreadable { path, .. } => {
                format!("Could not read the configuration file at {path}.")
            }
            Self::Malformed(detail) => format!("lexis.yaml is not valid: {detail}."),
            Self::InvalidValue { key, detail } => {
                format!("The setting `{key}` is invalid ({detail}). Check lexis.yaml or the environment.")
            }
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_url(),
            auth_scheme: AuthScheme::default(),
            request_timeout: DEFAULT_TIMEOUT,
            data_dir: default_data_dir(),
        }
    }
}

impl ClientSettings {
    /// Defaults, then `lexis.yaml`, then `.env` and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let file = match locate_config_file() {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|err| ConfigError::Unreadable {
                    path: path.display().to_string(),
                    detail: err.to_string(),
                })?;
                tracing::debug!(path = %path.display(), "loaded lexis.yaml");
                Some(parse_config_file(&contents)?)
            }
            None => None,
        };
        resolve(file, |key| std::env::var(key).ok())
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("default api url")
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "lexis")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".lexis"))
}

fn parse_config_file(contents: &str) -> Result<FileSection, ConfigError> {
    if contents.trim().is_empty() {
        return Ok(FileSection::default());
    }
    serde_yaml::from_str(contents).map_err(|err| ConfigError::Malformed(err.to_string()))
}

fn resolve(
    file: Option<FileSection>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings, ConfigError> {
    let mut settings = ClientSettings::default();

    if let Some(file) = file {
        if let Some(url) = file.api_url {
            settings.api_base_url = parse_url("api_url", &url)?;
        }
        if let Some(scheme) = file.auth_scheme {
            settings.auth_scheme = scheme;
        }
        if let Some(secs) = file.timeout_secs {
            settings.request_timeout = timeout("timeout_secs", secs)?;
        }
        if let Some(dir) = file.data_dir {
            settings.data_dir = dir;
        }
    }

    let env = |key: &str| env(key).filter(|value| !value.trim().is_empty());
    if let Some(url) = env("LEXIS_API_URL") {
        settings.api_base_url = parse_url("LEXIS_API_URL", &url)?;
    }
    if let Some(scheme) = env("LEXIS_AUTH_SCHEME") {
        settings.auth_scheme = scheme
            .parse()
            .map_err(|detail: String| ConfigError::InvalidValue {
                key: "LEXIS_AUTH_SCHEME",
                detail,
            })?;
    }
    if let Some(secs) = env("LEXIS_TIMEOUT_SECS") {
        let secs = secs
            .trim()
            .parse::<u64>()
            .map_err(|err| ConfigError::InvalidValue {
                key: "LEXIS_TIMEOUT_SECS",
                detail: err.to_string(),
            })?;
        settings.request_timeout = timeout("LEXIS_TIMEOUT_SECS", secs)?;
    }
    if let Some(dir) = env("LEXIS_DATA_DIR") {
        settings.data_dir = PathBuf::from(dir);
    }

    Ok(settings)
}

fn parse_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|err| ConfigError::InvalidValue {
        key,
        detail: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key,
            detail: format!("unsupported scheme `{}`", url.scheme()),
        });
    }
    Ok(url)
}

fn timeout(key: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            detail: "must be at least one second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn locate_config_file() -> Option<PathBuf> {
    lexis_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn lexis_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("lexis");
        paths.push(config_dir.join("lexis.yaml"));
        paths.push(config_dir.join("lexis.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".lexis").join("lexis.yaml"));
        paths.push(home_dir.join(".lexis").join("lexis.yml"));
    } else {
        paths.push(PathBuf::from("lexis.yaml"));
        paths.push(PathBuf::from("lexis.yml"));
    }
    paths
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSection {
    api_url: Option<String>,
    auth_scheme: Option<AuthScheme>,
    timeout_secs: Option<u64>,
    data_dir: Option<PathBuf>,
}
