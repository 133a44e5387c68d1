use serde::Deserialize;

/// Qdrant connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QdrantConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Collection written by ingestion and searched by prompt assembly
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_port() -> u16 {
    6334
}

fn default_timeout_secs() -> u64 {
    30
}

impl QdrantConfig {
    pub fn new(host: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            collection: collection.into(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// gRPC endpoint URL
    pub fn url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}
