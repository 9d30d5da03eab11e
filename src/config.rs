use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory scanned recursively for documents to index.
    pub data_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    [
        "**/*.txt", "**/*.md", "**/*.csv", "**/*.pdf", "**/*.docx", "**/*.epub", "**/*.ipynb",
        "**/*.html",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exclude_globs() -> Vec<String> {
    vec!["**/.gitkeep".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of nearest documents returned per query. Must be in [1, 7].
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    #[serde(default = "default_min_p")]
    pub min_p: f64,
    /// Quantization encoding of the served model: q4_0, q4_k, or q6_k.
    #[serde(default = "default_quantization")]
    pub quantization: String,
    /// Where the GGUF weights live. Downloaded from `model_url` when missing.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    /// Overrides the per-quantization default download URL.
    #[serde(default)]
    pub model_url: Option<String>,
    #[serde(default)]
    pub custom_ops_path: Option<PathBuf>,
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,
    /// Spawn and supervise the local inference server before chatting.
    #[serde(default = "default_true")]
    pub start_local_server: bool,
    /// Pipeline script handed to `mojo run`.
    #[serde(default = "default_pipeline_script")]
    pub pipeline_script: PathBuf,
    /// Seconds to wait for the readiness line before giving up.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model_name(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            min_p: default_min_p(),
            quantization: default_quantization(),
            model_path: None,
            model_url: None,
            custom_ops_path: None,
            tokenizer_path: None,
            start_local_server: true,
            pipeline_script: default_pipeline_script(),
            startup_timeout_secs: default_startup_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_model_name() -> String {
    "LLama3b".to_string()
}
fn default_temperature() -> f64 {
    0.5
}
fn default_max_tokens() -> u64 {
    8192
}
fn default_min_p() -> f64 {
    0.05
}
fn default_quantization() -> String {
    "q4_k".to_string()
}
fn default_true() -> bool {
    true
}
fn default_pipeline_script() -> PathBuf {
    PathBuf::from("../graph-api/serve_pipeline.🔥")
}
fn default_startup_timeout_secs() -> u64 {
    600
}

impl LlmConfig {
    /// Default GGUF download URL for the configured quantization encoding.
    pub fn default_model_url(&self) -> Result<&'static str> {
        match self.quantization.as_str() {
            "q4_0" => Ok("https://huggingface.co/QuantFactory/Meta-Llama-3-8B-GGUF/resolve/main/Meta-Llama-3-8B.Q4_0.gguf"),
            "q4_k" => Ok("https://huggingface.co/bartowski/Meta-Llama-3-8B-Instruct-GGUF/resolve/main/Meta-Llama-3-8B-Instruct-Q4_K_M.gguf"),
            "q6_k" => Ok("https://huggingface.co/bartowski/Meta-Llama-3-8B-Instruct-GGUF/resolve/main/Meta-Llama-3-8B-Instruct-Q6_K.gguf"),
            other => anyhow::bail!(
                "Unknown quantization encoding: '{}'. Must be q4_0, q4_k, or q6_k.",
                other
            ),
        }
    }

    /// Download URL to use: explicit override or per-quantization default.
    pub fn resolved_model_url(&self) -> Result<String> {
        match &self.model_url {
            Some(url) => Ok(url.clone()),
            None => Ok(self.default_model_url()?.to_string()),
        }
    }

    /// Local weights path: explicit override or `./models/<url basename>`.
    pub fn resolved_model_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.model_path {
            return Ok(path.clone());
        }
        let url = self.resolved_model_url()?;
        let basename = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive model file name from URL: {}", url))?;
        Ok(PathBuf::from("./models").join(basename))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_system_prompt")]
    pub system: String,
    /// User-message template. Must contain `{data}` and `{query}` placeholders.
    #[serde(default = "default_qa_template")]
    pub qa_template: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system: default_system_prompt(),
            qa_template: default_qa_template(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are a helpful document search assistant.\n\
     Your task is to find an answer to user's QUERY about their given documentations.\n\
     Be helpful.\n\
     Think step by step."
        .to_string()
}

fn default_qa_template() -> String {
    "Here is the context:\n\
     You are given a list of pairs of text documents and their sources as CONTEXT {data}.\n\
     Find the most relevant document that matches the QUERY {query} and give a detailed `ANSWER` \
     by including the `SOURCE` filename.\n\
     You are allowed to show relevant code from the context. \
     In case you don't know the answer say 'I don't know!'\n"
        .to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if !(1..=7).contains(&config.retrieval.top_k) {
        anyhow::bail!("retrieval.top_k must be in [1, 7]");
    }

    if !(0.0..=1.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.llm.min_p) {
        anyhow::bail!("llm.min_p must be in [0.0, 1.0]");
    }
    if config.llm.max_tokens == 0 {
        anyhow::bail!("llm.max_tokens must be > 0");
    }
    config.llm.default_model_url()?;

    // A template without both placeholders is a programming error, caught
    // here rather than mid-turn.
    if !config.prompt.qa_template.contains("{data}") {
        anyhow::bail!("prompt.qa_template is missing the {{data}} placeholder");
    }
    if !config.prompt.qa_template.contains("{query}") {
        anyhow::bail!("prompt.qa_template is missing the {{query}} placeholder");
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.provider != "local" {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
[index]
data_dir = "./ragdata"
"#
        .to_string()
    }

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(&base_toml()).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.llm.base_url, "http://localhost:8000");
        assert!(config.llm.start_local_server);
        assert!(config.prompt.qa_template.contains("{data}"));
    }

    #[test]
    fn top_k_out_of_range_rejected() {
        let toml_str = format!("{}\n[retrieval]\ntop_k = 8\n", base_toml());
        assert!(parse(&toml_str).is_err());
        let toml_str = format!("{}\n[retrieval]\ntop_k = 0\n", base_toml());
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn template_missing_placeholder_rejected() {
        let toml_str = format!(
            "{}\n[prompt]\nqa_template = \"answer {{query}} please\"\n",
            base_toml()
        );
        let err = parse(&toml_str).unwrap_err();
        assert!(err.to_string().contains("{data}"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let toml_str = format!("{}\n[embedding]\nprovider = \"cohere\"\n", base_toml());
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn unknown_quantization_rejected() {
        let toml_str = format!("{}\n[llm]\nquantization = \"q2_k\"\n", base_toml());
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn model_path_derived_from_url() {
        let config = parse(&base_toml()).unwrap();
        let path = config.llm.resolved_model_path().unwrap();
        assert_eq!(
            path,
            PathBuf::from("./models/Meta-Llama-3-8B-Instruct-Q4_K_M.gguf")
        );
    }
}
