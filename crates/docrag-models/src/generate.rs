//! Ollama generation client used to rephrase search queries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docrag_core::{ExpansionConfig, Result, VariantGenerator};

use crate::client::{build_client, endpoint, post_json};

const SERVICE: &str = "ollama generate";

/// Lines starting with these words are commentary, not queries.
const META_PREFIXES: &[&str] = &["here", "alternative", "variation", "query"];

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Small generative model served by Ollama (`POST /api/generate`).
pub struct OllamaGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    num_variations: usize,
    temperature: f32,
}

impl OllamaGenerator {
    /// Create a client from expansion configuration.
    pub fn new(config: &ExpansionConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: endpoint(&config.base_url, "api/generate"),
            model: config.model.clone(),
            num_variations: config.num_variations.clamp(2, 4),
            temperature: config.temperature,
        })
    }

    fn prompt(&self, query: &str) -> String {
        format!(
            "Generate {} alternative phrasings for this search query. \
             Return only the queries, one per line.\n\n\
             Original query: {}\n\n\
             Alternative queries:",
            self.num_variations, query
        )
    }
}

#[async_trait]
impl VariantGenerator for OllamaGenerator {
    async fn generate_variants(&self, query: &str) -> Result<Vec<String>> {
        let request = GenerateRequest {
            model: &self.model,
            prompt: self.prompt(query),
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                top_p: 0.9,
                num_predict: 100,
            },
        };

        let response: GenerateResponse =
            post_json(&self.client, SERVICE, &self.url, &request).await?;
        let variants = parse_variants(&response.response);

        debug!("{} produced {} variants", self.model, variants.len());
        Ok(variants)
    }
}

/// Parse model output into query strings.
///
/// Accepts a JSON array of strings anywhere in the text, otherwise one query
/// per line with numbering, bullets and surrounding quotes removed.
pub fn parse_variants(output: &str) -> Vec<String> {
    if let (Some(start), Some(end)) = (output.find('['), output.rfind(']')) {
        if start < end {
            if let Ok(items) = serde_json::from_str::<Vec<String>>(&output[start..=end]) {
                return items
                    .into_iter()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
    }

    output.lines().filter_map(clean_line).collect()
}

fn clean_line(line: &str) -> Option<String> {
    let mut line = line.trim();

    // "1. foo" or "2) foo"
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && digits <= 2 {
        if let Some(rest) = line[digits..]
            .strip_prefix('.')
            .or_else(|| line[digits..].strip_prefix(')'))
        {
            line = rest.trim();
        }
    }

    let line = line
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '•')
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim();

    let lower = line.to_lowercase();
    if line.is_empty()
        || line.starts_with("```")
        || META_PREFIXES.iter().any(|p| lower.starts_with(p))
    {
        return None;
    }

    Some(line.to_string())
}
