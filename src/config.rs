//! Orchestrator-wide configuration knobs, read strictly from the
//! environment, grounded on `ai-llm-service::config::default_config`'s
//! `must_env`/`env_opt_u32`-style reading (reimplemented locally here since
//! this crate does not depend on `ai-llm-service`).

use std::time::Duration;

use crate::errors::{ConfigError, OrchResult};
use crate::vcs::{ProviderConfig, VcsCapabilities};
use crate::vcs::types::PlatformKind;

/// Binary/media glob patterns, always filtered as `binary_file` ahead of any
/// other skip check, regardless of user configuration.
pub const BUILTIN_BINARY_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.ico", "*.bmp",
    "*.woff", "*.woff2", "*.ttf", "*.eot", "*.otf",
    "*.zip", "*.tar", "*.gz", "*.tgz", "*.7z", "*.jar",
];

/// Generic always-skip glob patterns, regardless of user configuration.
pub const BUILTIN_SKIP_PATTERNS: &[&str] = &[
    "*.lock", "package-lock.json", "Cargo.lock", "yarn.lock", "pnpm-lock.yaml",
    "*.min.js", "*.min.css",
    "*.d.ts",
    "*.pb.*", "*_pb2.*",
    "*.generated.*",
    "__generated__/**",
];

/// Test-path patterns used by the `test_file_lenient` rule.
pub const TEST_PATH_PATTERNS: &[&str] = &[".test.", ".spec.", "__tests__/", "test/", "tests/"];

/// All orchestrator-wide knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub provider: PlatformKind,
    pub max_diff_chars: usize,
    pub max_comments: usize,
    pub max_comments_per_file: usize,
    pub skip_drafts: bool,
    pub lenient_on_tests: bool,
    pub update_existing_comments: bool,
    pub precision_threshold: f32,
    pub skip_patterns: Vec<String>,
    pub stale_checkpoint_threshold: u32,
    pub rate_limit_floor: i64,
    pub rate_limit_window: RateLimitWindow,
    pub idempotency_ttl: Duration,
    pub inter_comment_delay: Duration,
}

/// The internal sliding-window limiter (default 5000 req/hour).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitWindow {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitWindow {
    fn default() -> Self {
        Self {
            max_requests: 5000,
            window: Duration::from_secs(3600),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            provider: PlatformKind::GitLab,
            max_diff_chars: crate::prompt::DEFAULT_MAX_DIFF_CHARS,
            max_comments: 25,
            max_comments_per_file: 5,
            skip_drafts: true,
            lenient_on_tests: true,
            update_existing_comments: true,
            precision_threshold: crate::precision_filter::DEFAULT_PRECISION_THRESHOLD,
            skip_patterns: Vec::new(),
            stale_checkpoint_threshold: 20,
            rate_limit_floor: 10,
            rate_limit_window: RateLimitWindow::default(),
            idempotency_ttl: Duration::from_secs(60),
            inter_comment_delay: Duration::from_millis(100),
        }
    }
}

impl OrchestratorConfig {
    /// Reads overrides from the environment, falling back to [`Default`] for
    /// anything unset. Unlike provider credentials (see [`ProviderConfig`]),
    /// every one of these knobs is optional.
    pub fn from_env() -> OrchResult<Self> {
        let mut cfg = Self::default();

        if let Some(kind) = env_str("REVIEW_PROVIDER") {
            cfg.provider = match kind.to_ascii_lowercase().as_str() {
                "gitlab" => PlatformKind::GitLab,
                "github" => PlatformKind::GitHub,
                other => {
                    return Err(ConfigError::InvalidValue {
                        var: "REVIEW_PROVIDER",
                        reason: format!("unknown platform {other:?}"),
                    }
                    .into());
                }
            };
        }
        if let Some(v) = env_u32("REVIEW_MAX_DIFF_CHARS")? {
            cfg.max_diff_chars = v as usize;
        }
        if let Some(v) = env_u32("REVIEW_MAX_COMMENTS")? {
            cfg.max_comments = v as usize;
        }
        if let Some(v) = env_u32("REVIEW_MAX_COMMENTS_PER_FILE")? {
            cfg.max_comments_per_file = v as usize;
        }
        if let Some(v) = env_bool("REVIEW_SKIP_DRAFTS")? {
            cfg.skip_drafts = v;
        }
        if let Some(v) = env_bool("REVIEW_LENIENT_ON_TESTS")? {
            cfg.lenient_on_tests = v;
        }
        if let Some(v) = env_bool("REVIEW_UPDATE_EXISTING_COMMENTS")? {
            cfg.update_existing_comments = v;
        }
        if let Some(v) = env_str("REVIEW_PRECISION_THRESHOLD") {
            cfg.precision_threshold = v.parse::<f32>().map_err(|_| ConfigError::InvalidValue {
                var: "REVIEW_PRECISION_THRESHOLD",
                reason: "expected a float in [0,1]".to_string(),
            })?;
        }
        if let Some(v) = env_str("REVIEW_SKIP_PATTERNS") {
            cfg.skip_patterns = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_u32("REVIEW_STALE_CHECKPOINT_THRESHOLD")? {
            cfg.stale_checkpoint_threshold = v;
        }

        Ok(cfg)
    }

    /// Builds the [`ProviderConfig`] credentials bundle for the configured
    /// platform; separated from the knobs above since these are secrets.
    pub fn provider_config_from_env(&self) -> OrchResult<ProviderConfig> {
        let var = match self.provider {
            PlatformKind::GitLab => "GITLAB_TOKEN",
            PlatformKind::GitHub => "GITHUB_TOKEN",
        };
        let token = must_env(var)?;
        let base_api = match self.provider {
            PlatformKind::GitLab => env_str("GITLAB_API_URL").unwrap_or_else(|| "https://gitlab.com/api/v4".to_string()),
            PlatformKind::GitHub => env_str("GITHUB_API_URL").unwrap_or_else(|| "https://api.github.com".to_string()),
        };
        let cfg = ProviderConfig {
            kind: self.provider,
            base_api,
            token,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Capabilities are a property of the concrete adapter, not of this config,
/// but callers commonly want "what can I do given my provider" up front.
pub fn expected_capabilities(_kind: PlatformKind) -> VcsCapabilities {
    VcsCapabilities::full()
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn must_env(name: &'static str) -> OrchResult<String> {
    env_str(name).ok_or_else(|| ConfigError::MissingVar(name).into())
}

fn env_u32(name: &'static str) -> OrchResult<Option<u32>> {
    match env_str(name) {
        Some(v) => v
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: name,
                reason: "expected a non-negative integer".to_string(),
            }
            .into()),
        None => Ok(None),
    }
}

fn env_bool(name: &'static str) -> OrchResult<Option<bool>> {
    match env_str(name) {
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                var: name,
                reason: "expected a boolean".to_string(),
            }
            .into()),
        },
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.max_comments, 25);
        assert_eq!(cfg.max_comments_per_file, 5);
        assert!((cfg.precision_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.stale_checkpoint_threshold, 20);
        assert_eq!(cfg.rate_limit_window.max_requests, 5000);
    }
}
