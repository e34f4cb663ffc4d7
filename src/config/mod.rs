//! Project Resolver (C4, §4.3) and effective configuration.
//!
//! Grounded in the teacher's TOML + env-var configuration idiom
//! (`StorageConfig`/`EmbeddingConfig` with `Default` impls, `shellexpand`-
//! style path handling). Precedence never merges across levels (§4.3): the
//! first source that names a project id wins outright.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::safety::SafetyAction;

const ENV_PROJECT_ID: &str = "MA_PROJECT_ID";
const PROJECT_LOCAL_CONFIG: &str = ".memory-anchor.toml";
const ENV_PREFIX: &str = "MA_";

/// On-disk / env-sourced configuration file shape.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub project_id: Option<String>,
    pub embedder_model: Option<String>,
    pub vector_dim: Option<usize>,
    pub vector_url: Option<String>,
    pub min_search_score: Option<f32>,
    pub session_expire_seconds: Option<i64>,
    pub auto_save_confidence: Option<f32>,
    pub pending_min_confidence: Option<f32>,
    pub budget: Option<BudgetConfig>,
    pub safety: Option<SafetyConfigFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BudgetConfig {
    pub l0: Option<usize>,
    pub l1: Option<usize>,
    pub l2: Option<usize>,
    pub l3: Option<usize>,
    pub l4: Option<usize>,
    pub total: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SafetyConfigFile {
    pub enabled: Option<bool>,
    pub max_chars: Option<usize>,
    /// Per-kind overrides of the Safety Filter's `block`/`redact`/`warn`
    /// action (§4.4, §6 `safety.rules.*`), e.g. `rules.email = "block"`.
    /// Kinds left unset keep their [`SafetyConfig::default`] action.
    pub rules: Option<HashMap<String, SafetyAction>>,
}

/// Fully-resolved configuration the Kernel actually runs with.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub project_id: String,
    pub collection_name: String,
    pub embedder_model: String,
    pub vector_dim: usize,
    pub vector_url: Option<String>,
    pub min_search_score: f32,
    pub session_expire_seconds: i64,
    pub auto_save_confidence: f32,
    pub pending_min_confidence: f32,
    pub approvals_needed: usize,
    pub budget_l0: usize,
    pub budget_l1: usize,
    pub budget_l2: usize,
    pub budget_l3: usize,
    pub budget_l4: usize,
    pub budget_total: usize,
    pub safety_enabled: bool,
    pub safety_max_chars: usize,
    /// Per-kind action overrides layered onto [`SafetyConfig::default`]'s
    /// rules; `None` means no config source supplied any.
    pub safety_rules: Option<HashMap<String, SafetyAction>>,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        EffectiveConfig {
            project_id: "default".to_string(),
            collection_name: collection_name_for("default"),
            embedder_model: "text-embedding-3-small".to_string(),
            vector_dim: 384,
            vector_url: None,
            min_search_score: 0.2,
            session_expire_seconds: 4 * 3600,
            auto_save_confidence: 0.9,
            pending_min_confidence: 0.7,
            approvals_needed: crate::types::APPROVALS_NEEDED,
            budget_l0: 500,
            budget_l1: 200,
            budget_l2: 500,
            budget_l3: 2000,
            budget_l4: 300,
            budget_total: 4000,
            safety_enabled: true,
            safety_max_chars: 2000,
            safety_rules: None,
        }
    }
}

/// Derive the per-project collection name (§4.3: `memory_anchor_notes_<project_id>`).
pub fn collection_name_for(project_id: &str) -> String {
    format!("memory_anchor_notes_{}", crate::vector::sanitize_ident(project_id))
}

fn load_toml(path: &Path) -> Result<Option<ConfigFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let parsed: ConfigFile =
        toml::from_str(&raw).map_err(|e| crate::error::MemoryAnchorError::Config(e.to_string()))?;
    Ok(Some(parsed))
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("memory-anchor").join("config.toml"))
}

/// Resolve the project id: env override, then project-local config, then
/// global config, then a fixed literal default. No merging: the first
/// source that yields a value wins completely (§4.3).
pub fn resolve_project_id(cwd: &Path) -> Result<String> {
    if let Ok(id) = env::var(ENV_PROJECT_ID) {
        if !id.trim().is_empty() {
            return Ok(id);
        }
    }
    if let Some(cfg) = load_toml(&cwd.join(PROJECT_LOCAL_CONFIG))? {
        if let Some(id) = cfg.project_id {
            return Ok(id);
        }
    }
    if let Some(path) = global_config_path() {
        if let Some(cfg) = load_toml(&path)? {
            if let Some(id) = cfg.project_id {
                return Ok(id);
            }
        }
    }
    Ok("default".to_string())
}

fn env_override<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(format!("{ENV_PREFIX}{key}")).ok().and_then(|v| v.parse().ok())
}

/// Resolve the full effective configuration, applying the same no-merge
/// precedence per individual field as `resolve_project_id` uses for the
/// project id, then overlaying `MA_*` environment variables last.
pub fn resolve(cwd: &Path) -> Result<EffectiveConfig> {
    let project_id = resolve_project_id(cwd)?;
    let mut effective = EffectiveConfig {
        project_id: project_id.clone(),
        collection_name: collection_name_for(&project_id),
        ..EffectiveConfig::default()
    };

    let local = load_toml(&cwd.join(PROJECT_LOCAL_CONFIG))?;
    let global = global_config_path().and_then(|p| load_toml(&p).ok().flatten());
    let file = local.or(global);

    if let Some(cfg) = file {
        apply_file(&mut effective, cfg);
    }

    if let Some(v) = env_override::<String>("EMBEDDER_MODEL") {
        effective.embedder_model = v;
    }
    if let Some(v) = env_override::<usize>("VECTOR_DIM") {
        effective.vector_dim = v;
    }
    if let Some(v) = env_override::<String>("VECTOR_URL") {
        effective.vector_url = Some(v);
    }
    if let Some(v) = env_override::<f32>("MIN_SEARCH_SCORE") {
        effective.min_search_score = v;
    }
    if let Some(v) = env_override::<i64>("SESSION_EXPIRE_SECONDS") {
        effective.session_expire_seconds = v;
    }
    if let Some(v) = env_override::<f32>("AUTO_SAVE_CONFIDENCE") {
        effective.auto_save_confidence = v;
    }
    if let Some(v) = env_override::<f32>("PENDING_MIN_CONFIDENCE") {
        effective.pending_min_confidence = v;
    }
    if let Some(v) = env_override::<usize>("BUDGET_L0") {
        effective.budget_l0 = v;
    }
    if let Some(v) = env_override::<usize>("BUDGET_L1") {
        effective.budget_l1 = v;
    }
    if let Some(v) = env_override::<usize>("BUDGET_L2") {
        effective.budget_l2 = v;
    }
    if let Some(v) = env_override::<usize>("BUDGET_L3") {
        effective.budget_l3 = v;
    }
    if let Some(v) = env_override::<usize>("BUDGET_L4") {
        effective.budget_l4 = v;
    }
    if let Some(v) = env_override::<usize>("BUDGET_TOTAL") {
        effective.budget_total = v;
    }
    if let Some(v) = env_override::<bool>("SAFETY_ENABLED") {
        effective.safety_enabled = v;
    }

    Ok(effective)
}

fn apply_file(effective: &mut EffectiveConfig, cfg: ConfigFile) {
    if let Some(v) = cfg.embedder_model {
        effective.embedder_model = v;
    }
    if let Some(v) = cfg.vector_dim {
        effective.vector_dim = v;
    }
    if let Some(v) = cfg.vector_url {
        effective.vector_url = Some(v);
    }
    if let Some(v) = cfg.min_search_score {
        effective.min_search_score = v;
    }
    if let Some(v) = cfg.session_expire_seconds {
        effective.session_expire_seconds = v;
    }
    if let Some(v) = cfg.auto_save_confidence {
        effective.auto_save_confidence = v;
    }
    if let Some(v) = cfg.pending_min_confidence {
        effective.pending_min_confidence = v;
    }
    if let Some(budget) = cfg.budget {
        if let Some(v) = budget.l0 {
            effective.budget_l0 = v;
        }
        if let Some(v) = budget.l1 {
            effective.budget_l1 = v;
        }
        if let Some(v) = budget.l2 {
            effective.budget_l2 = v;
        }
        if let Some(v) = budget.l3 {
            effective.budget_l3 = v;
        }
        if let Some(v) = budget.l4 {
            effective.budget_l4 = v;
        }
        if let Some(v) = budget.total {
            effective.budget_total = v;
        }
    }
    if let Some(safety) = cfg.safety {
        if let Some(v) = safety.enabled {
            effective.safety_enabled = v;
        }
        if let Some(v) = safety.max_chars {
            effective.safety_max_chars = v;
        }
        if let Some(v) = safety.rules {
            effective.safety_rules = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_name_sanitizes_project_id() {
        assert_eq!(collection_name_for("my project!"), "memory_anchor_notes_my_project_");
    }

    #[test]
    fn default_config_has_sane_budgets() {
        let cfg = EffectiveConfig::default();
        assert_eq!(cfg.approvals_needed, 3);
        assert_eq!(cfg.budget_l0 + cfg.budget_l1 + cfg.budget_l2 + cfg.budget_l3 + cfg.budget_l4, cfg.budget_total);
    }

    #[test]
    fn apply_file_threads_safety_rule_overrides() {
        let mut effective = EffectiveConfig::default();
        let mut rules = HashMap::new();
        rules.insert("ip_address".to_string(), SafetyAction::Block);
        let cfg = ConfigFile {
            safety: Some(SafetyConfigFile { enabled: None, max_chars: None, rules: Some(rules) }),
            ..ConfigFile::default()
        };
        apply_file(&mut effective, cfg);
        assert_eq!(
            effective.safety_rules.unwrap().get("ip_address"),
            Some(&SafetyAction::Block)
        );
    }
}
