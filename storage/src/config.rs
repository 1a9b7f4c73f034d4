use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    /// Process-local, lost on restart.
    Memory,
    Azure { connection_string: String },
}

fn default_container() -> String {
    "fdr3-flows".into()
}

fn default_table() -> String {
    "fdr3conversionerrors".into()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct BlobStoreConfig {
    #[serde(flatten)]
    pub r#type: StoreType,
    #[serde(default = "default_container")]
    pub container: String,
    /// Upper bound on a single storage request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct TableStoreConfig {
    #[serde(flatten)]
    pub r#type: StoreType,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl BlobStoreConfig {
    pub fn memory() -> Self {
        BlobStoreConfig {
            r#type: StoreType::Memory,
            container: default_container(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TableStoreConfig {
    pub fn memory() -> Self {
        TableStoreConfig {
            r#type: StoreType::Memory,
            table: default_table(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azure_blob_store() {
        let yaml = r#"
type: azure
connection_string: "UseDevelopmentStorage=true"
container: flows
timeout_secs: 5
"#;
        let config: BlobStoreConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config,
            BlobStoreConfig {
                r#type: StoreType::Azure {
                    connection_string: "UseDevelopmentStorage=true".into()
                },
                container: "flows".into(),
                timeout_secs: 5,
            }
        );
    }

    #[test]
    fn test_table_store_defaults() {
        let config: TableStoreConfig = serde_yaml::from_str("type: memory").unwrap();
        assert_eq!(config.r#type, StoreType::Memory);
        assert_eq!(config.table, "fdr3conversionerrors");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config, TableStoreConfig::memory());
    }

    #[test]
    fn test_unknown_store_type() {
        assert!(serde_yaml::from_str::<TableStoreConfig>("type: gcs").is_err());
    }
}
