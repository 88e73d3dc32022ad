//! Configuration for the honeypot orchestrator, loaded from environment
//! variables (optionally via a `.env` file in development).

use anyhow::{Context, Result};

/// One entry in the voter roster: which provider, which model, where its
/// prompt template lives, and its fallback key if the rotator pool is
/// empty.
#[derive(Debug, Clone)]
pub struct VoterConfig {
    pub name: String,
    pub provider: Provider,
    pub endpoint: String,
    pub model: String,
    pub prompt_template_path: String,
    pub default_key: String,
}

/// The two upstream LLM provider families the Key Rotator tracks
/// independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Groq,
    Nvidia,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Slots in the Worker Pool.
    pub worker_pool_size: usize,

    /// First-contact delay before the Council runs, in seconds.
    pub council_delay_seconds: f64,

    /// Session-state promotion threshold for aggregate confidence.
    pub scam_confidence_threshold: f64,

    /// Advisory only — no component in this crate consumes it (see
    /// SPEC_FULL.md's Open Question resolution).
    pub inactivity_timeout_seconds: u64,

    /// Voter roster used to instantiate the Council.
    pub voters: Vec<VoterConfig>,

    /// Round-robin key pools, one per provider.
    pub groq_api_keys: Vec<String>,
    pub nvidia_api_keys: Vec<String>,

    /// Judge model configuration.
    pub judge_endpoint: String,
    pub judge_model: String,
    pub judge_api_key: String,

    /// Extractor's LLM-pass model configuration.
    pub extractor_endpoint: String,
    pub extractor_model: String,
    pub extractor_api_key: String,

    /// Outbound callback target and inbound auth secret.
    pub callback_url: String,
    pub api_secret_key: String,

    /// HTTP front door bind address.
    pub host: String,
    pub port: u16,

    /// Maximum accepted inbound message length in bytes; longer requests
    /// are rejected at the HTTP boundary with 4xx before reaching the core.
    pub max_message_bytes: usize,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from the environment. Fields with a documented
    /// default fall back silently on parse failure, matching the
    /// upstream pattern; fields with no sane default (ports, required
    /// secrets) are a hard startup error via `anyhow::Context`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let worker_pool_size: usize = env_or("WORKER_POOL_SIZE", 4);
        let council_delay_seconds: f64 = env_or("COUNCIL_DELAY_SECONDS", 3.0);
        let scam_confidence_threshold: f64 = env_or("SCAM_CONFIDENCE_THRESHOLD", 0.6);
        let inactivity_timeout_seconds: u64 = env_or("INACTIVITY_TIMEOUT_SECONDS", 300);

        let groq_api_keys = parse_keys(&env_string("GROQ_API_KEYS", ""));
        let nvidia_api_keys = parse_keys(&env_string("NVIDIA_API_KEYS", ""));

        let groq_fallback_key = env_string("GROQ_API_KEY", "");
        let nvidia_fallback_key = env_string("NVIDIA_API_KEY", "");

        let nvidia_base_url = env_string(
            "NVIDIA_BASE_URL",
            "https://integrate.api.nvidia.com/v1/chat/completions",
        );
        let groq_base_url = env_string(
            "GROQ_BASE_URL",
            "https://api.groq.com/openai/v1/chat/completions",
        );

        let voters = vec![
            VoterConfig {
                name: "nemotron".to_string(),
                provider: Provider::Nvidia,
                endpoint: nvidia_base_url.clone(),
                model: env_string("NVIDIA_MODEL_NEMOTRON", "nvidia/llama-3.1-nemotron-70b-instruct"),
                prompt_template_path: env_string("PROMPT_NEMOTRON", "prompts/nemotron.txt"),
                default_key: nvidia_fallback_key.clone(),
            },
            VoterConfig {
                name: "multilingual_safety".to_string(),
                provider: Provider::Nvidia,
                endpoint: nvidia_base_url.clone(),
                model: env_string("NVIDIA_MODEL_MULTILINGUAL", "nvidia/llama-3.1-nemoguard-8b-content-safety"),
                prompt_template_path: env_string("PROMPT_MULTILINGUAL", "prompts/multilingual_safety.txt"),
                default_key: nvidia_fallback_key.clone(),
            },
            VoterConfig {
                name: "minimax".to_string(),
                provider: Provider::Nvidia,
                endpoint: nvidia_base_url.clone(),
                model: env_string("NVIDIA_MODEL_MINIMAX", "minimaxai/minimax-m2"),
                prompt_template_path: env_string("PROMPT_MINIMAX", "prompts/minimax.txt"),
                default_key: nvidia_fallback_key.clone(),
            },
            VoterConfig {
                name: "llama_scout".to_string(),
                provider: Provider::Groq,
                endpoint: groq_base_url.clone(),
                model: env_string("GROQ_MODEL_SCOUT", "meta-llama/llama-4-scout-17b-16e-instruct"),
                prompt_template_path: env_string("PROMPT_SCOUT", "prompts/llama_scout.txt"),
                default_key: groq_fallback_key.clone(),
            },
            VoterConfig {
                name: "gpt_oss".to_string(),
                provider: Provider::Groq,
                endpoint: groq_base_url.clone(),
                model: env_string("GROQ_MODEL_GPT_OSS", "openai/gpt-oss-120b"),
                prompt_template_path: env_string("PROMPT_GPT_OSS", "prompts/gpt_oss.txt"),
                default_key: groq_fallback_key.clone(),
            },
        ];

        Ok(Config {
            worker_pool_size,
            council_delay_seconds,
            scam_confidence_threshold,
            inactivity_timeout_seconds,
            voters,
            groq_api_keys,
            nvidia_api_keys,
            judge_endpoint: nvidia_base_url.clone(),
            judge_model: env_string("NVIDIA_MODEL_JUDGE", "nvidia/llama-3.1-nemotron-70b-instruct"),
            judge_api_key: env_string("JUDGE_AGENT_API_KEY", &nvidia_fallback_key),
            extractor_endpoint: groq_base_url,
            extractor_model: env_string("GROQ_MODEL_EXTRACTOR", "meta-llama/llama-4-scout-17b-16e-instruct"),
            extractor_api_key: groq_fallback_key,
            callback_url: env_string(
                "CALLBACK_URL",
                "https://hackathon.guvi.in/api/updateHoneyPotFinalResult",
            ),
            api_secret_key: env_string("API_SECRET_KEY", ""),
            host: env_string("HOST", "0.0.0.0"),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .context("invalid PORT")?,
            max_message_bytes: env_or("MAX_MESSAGE_BYTES", 8192),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keys_filters_blank_entries() {
        assert_eq!(parse_keys("a, b ,,c"), vec!["a", "b", "c"]);
        assert_eq!(parse_keys(""), Vec::<String>::new());
    }

    #[test]
    fn inactivity_timeout_parses_but_is_unused() {
        std::env::set_var("INACTIVITY_TIMEOUT_SECONDS", "900");
        let v: u64 = env_or("INACTIVITY_TIMEOUT_SECONDS", 300);
        assert_eq!(v, 900);
        std::env::remove_var("INACTIVITY_TIMEOUT_SECONDS");
    }
}
