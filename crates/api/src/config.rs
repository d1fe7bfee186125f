use anyhow::Context;
use pipeline::PipelineConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Where the node-link JSON lives. Unset keeps the graph in memory only.
    pub graph_path: Option<PathBuf>,
    pub ollama_url: String,
    pub ollama_model: String,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub json_logs: bool,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
        }
    }
}

impl ServerConfig {
    /// Read the environment; unset variables fall back to local defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .context("BIND_ADDR is not a socket address")?;

        let pipeline = match lookup("PIPELINE_CONFIG") {
            Some(path) => PipelineConfig::from_toml_file(&path)?,
            None => PipelineConfig::default(),
        };

        let mut cache = CacheConfig::default();
        if let Some(max_entries) = lookup("CACHE_MAX_ENTRIES") {
            cache.max_entries = max_entries
                .parse()
                .context("CACHE_MAX_ENTRIES is not a number")?;
            cache.enabled = cache.max_entries > 0;
        }

        Ok(Self {
            bind_addr,
            graph_path: lookup("GRAPH_PATH").map(PathBuf::from),
            ollama_url: lookup("OLLAMA_URL").unwrap_or_else(|| "http://localhost:11434".to_string()),
            ollama_model: lookup("OLLAMA_MODEL").unwrap_or_else(|| "llama3.1".to_string()),
            pipeline,
            cache,
            json_logs: lookup("LOG_FORMAT").is_some_and(|format| format.eq_ignore_ascii_case("json")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.bind_addr.port(), 3000);
        assert!(config.graph_path.is_none());
        assert!(config.cache.enabled);
        assert!(!config.json_logs);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("GRAPH_PATH", "/tmp/graph.json"),
            ("LOG_FORMAT", "JSON"),
            ("CACHE_MAX_ENTRIES", "0"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.graph_path, Some(PathBuf::from("/tmp/graph.json")));
        assert!(config.json_logs);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_bad_values_fail() {
        assert!(ServerConfig::from_lookup(lookup(&[("BIND_ADDR", "nowhere")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("PIPELINE_CONFIG", "/nonexistent.toml")])).is_err());
    }
}
