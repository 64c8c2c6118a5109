use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::criteria::{CompositionMatch, CriteriaInput, ElementCriteria};
use crate::error::HarvestError;
use crate::pipeline::PipelineRequest;
use crate::remote::DEFAULT_SERVICE_URL;
use crate::store::OutputLayout;

pub const CONFIG_FILE_NAME: &str = "matinf.json";
pub const API_KEY_ENV: &str = "MATINF_API_KEY";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub output: OutputLayout,
    #[serde(default)]
    pub query: Option<QueryConfig>,
}

/// A pipeline request as written in the config file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub sample_typename: Option<String>,
    #[serde(default)]
    pub associated_typenames: Vec<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub elements: Option<CriteriaInput>,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub composition_match: CompositionMatch,
}

impl QueryConfig {
    pub fn into_request(self) -> Result<PipelineRequest, HarvestError> {
        let sample_typename = self
            .sample_typename
            .ok_or_else(|| missing_field("sample_typename"))?;
        let start_date = self.start_date.ok_or_else(|| missing_field("start_date"))?;
        let end_date = self.end_date.ok_or_else(|| missing_field("end_date"))?;
        let criteria = match self.elements {
            Some(input) => ElementCriteria::try_from(input)?,
            None => ElementCriteria::default(),
        };
        let mut request = PipelineRequest::new(
            &self.associated_typenames,
            &sample_typename,
            &start_date,
            &end_date,
            criteria,
        )?;
        request.strict = self.strict;
        request.composition_match = self.composition_match;
        Ok(request)
    }
}

fn missing_field(name: &str) -> HarvestError {
    HarvestError::InvalidCriteria(format!("query.{name} is required"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ServiceConfig {
    pub fn require_api_key(&self) -> Result<&str, HarvestError> {
        self.api_key.as_deref().ok_or(HarvestError::MissingApiKey)
    }
}

#[derive(Debug)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub source: Option<PathBuf>,
    pub service: ServiceConfig,
    pub output: OutputLayout,
    pub query: Option<QueryConfig>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit `path` must exist. Without one, `matinf.json` in the
    /// working directory is tried, then the user config directory, then
    /// built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::discover(),
        };

        let Some(config_path) = config_path else {
            return Self::resolve_config(Config::default(), None, env_api_key());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, Some(config_path), env_api_key())
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("matinf-harvest").join(CONFIG_FILE_NAME))
            .filter(|candidate| candidate.exists())
    }

    /// `env_key` wins over the file's `api_key`.
    pub fn resolve_config(
        config: Config,
        source: Option<PathBuf>,
        env_key: Option<String>,
    ) -> Result<ResolvedConfig, HarvestError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(HarvestError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let api_key = env_key
            .or(config.api_key)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        let service = ServiceConfig {
            url: config
                .service_url
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            api_key,
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        };

        Ok(ResolvedConfig {
            schema_version,
            source,
            service,
            output: config.output,
            query: config.query,
        })
    }
}

fn env_api_key() -> Option<String> {
    env::var(API_KEY_ENV).ok()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_without_file() {
        let resolved = ConfigLoader::resolve_config(Config::default(), None, None).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.service.url, DEFAULT_SERVICE_URL);
        assert_eq!(resolved.service.timeout, Duration::from_secs(60));
        assert_eq!(resolved.output, OutputLayout::default());
        assert_matches!(resolved.service.require_api_key(), Err(HarvestError::MissingApiKey));
    }

    #[test]
    fn environment_key_wins() {
        let config = Config {
            api_key: Some("from-file".to_string()),
            ..Config::default()
        };
        let resolved =
            ConfigLoader::resolve_config(config, None, Some("from-env".to_string())).unwrap();
        assert_eq!(resolved.service.api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn rejects_unknown_schema_version() {
        let config = Config {
            schema_version: Some(7),
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config, None, None),
            Err(HarvestError::ConfigParse(_))
        );
    }

    #[test]
    fn query_block_requires_dates() {
        let query = QueryConfig {
            sample_typename: Some("Sample".to_string()),
            associated_typenames: vec!["Composition".to_string()],
            ..QueryConfig::default()
        };
        assert_matches!(query.into_request(), Err(HarvestError::InvalidCriteria(_)));
    }
}
