use crate::model::MetadataRegistry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataContextConfig {
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub commit: CommitConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Whether `DataContext::merge` traverses nested references and collections
    pub deep_by_default: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Dump the context content at debug level after each commit
    pub dump_content: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// JSON file with entity class definitions
    pub schema_path: Option<PathBuf>,
}

impl Default for DataContextConfig {
    fn default() -> Self {
        Self {
            merge: MergeConfig::default(),
            commit: CommitConfig::default(),
            metadata: MetadataConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            deep_by_default: true,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl DataContextConfig {
    /// Load configuration from defaults, an optional config file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&DataContextConfig::default())?);

        config = config.add_source(config::File::with_name("graph_context").required(false));

        // e.g. GRAPH_CONTEXT_MERGE__DEEP_BY_DEFAULT=false
        config = config.add_source(
            config::Environment::with_prefix("GRAPH_CONTEXT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = config.build()?;
        let context_config: DataContextConfig = config.try_deserialize()?;

        Ok(context_config)
    }

    /// Load the metadata registry named by `metadata.schema_path`, if any
    pub fn load_metadata(&self) -> crate::error::Result<Option<MetadataRegistry>> {
        match &self.metadata.schema_path {
            Some(path) => MetadataRegistry::load(path).map(Some),
            None => Ok(None),
        }
    }
}

/// Initialize env_logger with the configured filter. Safe to call more than once.
pub fn init_logging(config: &DataContextConfig) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter.as_str()),
    )
    .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DataContextConfig::default();
        assert!(config.merge.deep_by_default);
        assert!(!config.commit.dump_content);
        assert!(config.metadata.schema_path.is_none());
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn load_without_sources_gives_defaults() {
        let config = DataContextConfig::load().unwrap();
        assert!(config.merge.deep_by_default);
        assert!(config.load_metadata().unwrap().is_none());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let config: DataContextConfig =
            serde_json::from_str(r#"{"commit": {"dump_content": true}}"#).unwrap();
        assert!(config.commit.dump_content);
        assert!(config.merge.deep_by_default);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn missing_schema_file_is_an_error() {
        let config = DataContextConfig {
            metadata: MetadataConfig {
                schema_path: Some(PathBuf::from("/nonexistent/schema.json")),
            },
            ..DataContextConfig::default()
        };
        assert!(config.load_metadata().is_err());
    }
}
