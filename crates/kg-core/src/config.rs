//! Configuration for the graph store, the agent loop and the generation backend.
//!
//! Load order: `.kg/config.toml` → environment variables → defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KgConfig {
    pub store: StoreConfig,
    pub agent: AgentConfig,
    pub generation: GenerationConfig,
}

/// SPARQL endpoint and vocabulary settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Query endpoint (GraphDB repository URL or any SPARQL 1.1 endpoint).
    pub endpoint: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// IRI prefix for `Q` identifiers.
    pub entity_namespace: String,
    /// IRI prefix for `P` identifiers.
    pub predicate_namespace: String,
    pub description_predicate: String,
    pub label_predicate: String,
    /// Maximum number of search hits returned to the model.
    pub search_limit: usize,
}

/// Tool-call syntax the model is instructed to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallSyntax {
    /// `{"name": "...", "parameters": {...}}` embedded in the text.
    #[default]
    Json,
    /// `<function=name>{...}</function>`.
    Tag,
}

impl std::str::FromStr for CallSyntax {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "tag" => Ok(Self::Tag),
            other => Err(format!("unknown call syntax '{other}' (expected json or tag)")),
        }
    }
}

impl std::fmt::Display for CallSyntax {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallSyntax::Json => write!(f, "json"),
            CallSyntax::Tag => write!(f, "tag"),
        }
    }
}

/// Orchestration loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Graph capabilities to activate, or `["all"]`.
    pub capabilities: Vec<String>,
    pub call_syntax: CallSyntax,
    /// Generation requests allowed per task, nudges included. The task fails
    /// right after the last one unless an answer was accepted.
    pub max_iterations: usize,
    /// Overall wall-clock limit per task. Unset means no limit.
    pub timeout_secs: Option<u64>,
    /// Role name used for tool-result turns when talking to the backend.
    pub tool_result_role: String,
}

/// Sampling and endpoint settings for the generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// OpenAI-compatible base URL, e.g. `http://localhost:8000/v1`.
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key, if any.
    pub api_key_env: Option<String>,
    pub temperature: f32,
    pub top_k: Option<u32>,
    pub top_p: f32,
    pub max_new_tokens: u32,
    /// When false, decoding is greedy (temperature 0).
    pub do_sample: bool,
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:7200/repositories/wikidata5m".to_string(),
            timeout_secs: 30,
            entity_namespace: "http://www.wikidata.org/entity/".to_string(),
            predicate_namespace: "http://www.wikidata.org/entity/".to_string(),
            description_predicate: "http://schema.org/description".to_string(),
            label_predicate: "http://www.w3.org/2000/01/rdf-schema#label".to_string(),
            search_limit: 10,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            capabilities: vec!["search_entities".to_string()],
            call_syntax: CallSyntax::Json,
            max_iterations: 20,
            timeout_secs: None,
            tool_result_role: "ipython".to_string(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_string(),
            model: "meta-llama/Llama-3.1-8B-Instruct".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            temperature: 0.6,
            top_k: Some(50),
            top_p: 0.9,
            max_new_tokens: 512,
            do_sample: true,
            request_timeout_secs: 120,
        }
    }
}

/// Helper to parse an env var and apply it to a config field.
fn env_override<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(n) = v.parse()
    {
        *target = n;
    }
}

impl KgConfig {
    /// Load config from `.kg/config.toml` in the project root, with env var overrides.
    /// Falls back to defaults if no config file exists.
    pub fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".kg").join("config.toml");

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", config_path.display()))?
        } else {
            Self::default()
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("KG_ENDPOINT") {
            self.store.endpoint = endpoint;
        }
        env_override("KG_STORE_TIMEOUT", &mut self.store.timeout_secs);
        env_override("KG_SEARCH_LIMIT", &mut self.store.search_limit);
        env_override("KG_MAX_ITERATIONS", &mut self.agent.max_iterations);
        if let Ok(v) = std::env::var("KG_TIMEOUT")
            && let Ok(secs) = v.parse()
        {
            self.agent.timeout_secs = Some(secs);
        }
        // A bad syntax name fails the load.
        if let Ok(v) = std::env::var("KG_CALL_SYNTAX") {
            self.agent.call_syntax = v.parse().map_err(anyhow::Error::msg)?;
        }
        if let Ok(v) = std::env::var("KG_CAPABILITIES") {
            self.agent.capabilities = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Ok(url) = std::env::var("KG_BASE_URL") {
            self.generation.base_url = url;
        }
        if let Ok(model) = std::env::var("KG_MODEL") {
            self.generation.model = model;
        }
        Ok(())
    }

    /// Reject settings that would make every task fail.
    pub fn validate(&self) -> Result<()> {
        if self.agent.max_iterations == 0 {
            anyhow::bail!("agent.max_iterations must be at least 1");
        }
        if self.store.search_limit == 0 {
            anyhow::bail!("store.search_limit must be at least 1");
        }
        if !(self.generation.top_p > 0.0 && self.generation.top_p <= 1.0) {
            anyhow::bail!(
                "generation.top_p ({}) must be in (0, 1]",
                self.generation.top_p
            );
        }
        if self.agent.capabilities.is_empty() {
            anyhow::bail!("agent.capabilities must name at least one capability or \"all\"");
        }
        Ok(())
    }

    /// Render as TOML, used as the header of batch logs.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KgConfig::default();
        assert_eq!(config.store.timeout_secs, 30);
        assert_eq!(config.store.search_limit, 10);
        assert_eq!(config.agent.max_iterations, 20);
        assert_eq!(config.agent.call_syntax, CallSyntax::Json);
        assert_eq!(config.agent.capabilities, vec!["search_entities"]);
        assert_eq!(config.agent.tool_result_role, "ipython");
        assert!(config.agent.timeout_secs.is_none());
        assert_eq!(config.generation.max_new_tokens, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[store]
endpoint = "http://graphdb:7200/repositories/kg"
search_limit = 5

[agent]
capabilities = ["all"]
call_syntax = "tag"
timeout_secs = 90
"#;
        let config: KgConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.endpoint, "http://graphdb:7200/repositories/kg");
        assert_eq!(config.store.search_limit, 5);
        assert_eq!(config.agent.capabilities, vec!["all"]);
        assert_eq!(config.agent.call_syntax, CallSyntax::Tag);
        assert_eq!(config.agent.timeout_secs, Some(90));
        // Defaults for unspecified fields
        assert_eq!(config.agent.max_iterations, 20);
        assert_eq!(config.store.timeout_secs, 30);
    }

    #[test]
    fn test_config_load_nonexistent() {
        let config = KgConfig::load(Path::new("/nonexistent/path")).unwrap();
        assert_eq!(config.store.search_limit, 10);
    }

    #[test]
    fn test_load_rejects_zero_iterations() {
        let tmp = tempfile::tempdir().unwrap();
        let kg_dir = tmp.path().join(".kg");
        std::fs::create_dir_all(&kg_dir).unwrap();
        std::fs::write(
            kg_dir.join("config.toml"),
            r"
[agent]
max_iterations = 0
",
        )
        .unwrap();

        let err = KgConfig::load(tmp.path()).unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn test_load_rejects_unknown_call_syntax() {
        let tmp = tempfile::tempdir().unwrap();
        let kg_dir = tmp.path().join(".kg");
        std::fs::create_dir_all(&kg_dir).unwrap();
        std::fs::write(
            kg_dir.join("config.toml"),
            r#"
[agent]
call_syntax = "xml"
"#,
        )
        .unwrap();

        assert!(KgConfig::load(tmp.path()).is_err());
    }

    #[test]
    fn test_call_syntax_from_str() {
        assert_eq!("TAG".parse::<CallSyntax>(), Ok(CallSyntax::Tag));
        assert!("yaml".parse::<CallSyntax>().is_err());
    }

    #[test]
    fn test_to_toml_round_trips_sections() {
        let rendered = KgConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[store]"));
        assert!(rendered.contains("[agent]"));
        assert!(rendered.contains("max_iterations = 20"));
    }
}
