//! Configuration for abgate.
//!
//! Callers hold a [`ConfigRepository`] handle instead of reading ambient state.
//! Values are layered: CLI flag, then config file, then built-in default.

use abgate_adapters::{ChangeEvent, ChangeKind, ChangeNotifier, InProcessNotifier, Subscription};
use abgate_error::{AbgateError, ConfigError};
use abgate_types::{
    ConfigFile, DefaultsConfig, EvaluationPolicy, PolicyConfig, RecommendationPolicy,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const DEFAULT_CONFIG_FILE: &str = "abgate.toml";

const CONFIG_RESOURCE_KEY: &str = "config";

pub type ConfigListener = Arc<dyn Fn(&ConfigFile) + Send + Sync>;

pub trait ConfigRepository: Send + Sync {
    fn load(&self) -> anyhow::Result<ConfigFile>;

    fn save(&self, config: &ConfigFile) -> anyhow::Result<()>;

    /// Call `listener` with the new config after every successful save.
    fn on_change(&self, listener: ConfigListener) -> anyhow::Result<Subscription>;
}

/// TOML file on disk. A missing file loads as the default config.
#[derive(Debug, Clone)]
pub struct TomlConfigRepository {
    path: PathBuf,
    notifier: InProcessNotifier,
}

impl TomlConfigRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            notifier: InProcessNotifier::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_toml(path: &Path) -> Result<ConfigFile, AbgateError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found; using defaults");
        return Ok(ConfigFile::default());
    }
    let text = fs::read_to_string(path).map_err(|e| AbgateError::io(path, e))?;
    toml::from_str(&text).map_err(|source| AbgateError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

impl ConfigRepository for TomlConfigRepository {
    fn load(&self) -> anyhow::Result<ConfigFile> {
        Ok(load_toml(&self.path)?)
    }

    fn save(&self, config: &ConfigFile) -> anyhow::Result<()> {
        let text = toml::to_string_pretty(config).map_err(AbgateError::from)?;
        atomic_write(&self.path, text.as_bytes())?;
        tracing::info!(path = %self.path.display(), "config saved");
        self.notifier
            .publish(CONFIG_RESOURCE_KEY, ChangeKind::Modified);
        Ok(())
    }

    fn on_change(&self, listener: ConfigListener) -> anyhow::Result<Subscription> {
        let path = self.path.clone();
        self.notifier.subscribe(
            CONFIG_RESOURCE_KEY,
            Arc::new(move |_event: &ChangeEvent| match load_toml(&path) {
                Ok(cfg) => listener(&cfg),
                Err(err) => {
                    tracing::warn!(error = %err, "config changed but could not be reloaded");
                }
            }),
        )
    }
}

/// Config held in memory; for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConfigRepository {
    current: Arc<Mutex<ConfigFile>>,
    notifier: InProcessNotifier,
}

impl InMemoryConfigRepository {
    pub fn new(config: ConfigFile) -> Self {
        Self {
            current: Arc::new(Mutex::new(config)),
            notifier: InProcessNotifier::new(),
        }
    }

    fn snapshot(current: &Mutex<ConfigFile>) -> ConfigFile {
        current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ConfigRepository for InMemoryConfigRepository {
    fn load(&self) -> anyhow::Result<ConfigFile> {
        Ok(Self::snapshot(&self.current))
    }

    fn save(&self, config: &ConfigFile) -> anyhow::Result<()> {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
        self.notifier
            .publish(CONFIG_RESOURCE_KEY, ChangeKind::Modified);
        Ok(())
    }

    fn on_change(&self, listener: ConfigListener) -> anyhow::Result<Subscription> {
        let current = Arc::clone(&self.current);
        self.notifier.subscribe(
            CONFIG_RESOURCE_KEY,
            Arc::new(move |_event: &ChangeEvent| listener(&Self::snapshot(&current))),
        )
    }
}

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolicyOverrides {
    pub confidence_level: Option<f64>,
    pub min_sample_size: Option<u64>,
    pub high_significance_pct: Option<f64>,
    pub medium_significance_pct: Option<f64>,
}

/// Merge overrides, config file and defaults into a validated policy.
pub fn resolve_policy(
    config: &ConfigFile,
    overrides: &PolicyOverrides,
) -> Result<EvaluationPolicy, ConfigError> {
    let defaults = RecommendationPolicy::default();
    let policy = EvaluationPolicy {
        confidence_level_pct: overrides
            .confidence_level
            .or(config.defaults.confidence_level)
            .unwrap_or(EvaluationPolicy::default().confidence_level_pct),
        recommendation: RecommendationPolicy {
            min_sample_size: overrides
                .min_sample_size
                .or(config.policy.min_sample_size)
                .unwrap_or(defaults.min_sample_size),
            high_significance_pct: overrides
                .high_significance_pct
                .or(config.policy.high_significance_pct)
                .unwrap_or(defaults.high_significance_pct),
            medium_significance_pct: overrides
                .medium_significance_pct
                .or(config.policy.medium_significance_pct)
                .unwrap_or(defaults.medium_significance_pct),
        },
    };
    validate_policy(&policy)?;
    Ok(policy)
}

pub fn validate_policy(policy: &EvaluationPolicy) -> Result<(), ConfigError> {
    let level = policy.confidence_level_pct;
    if !(level.is_finite() && level > 0.0 && level < 100.0) {
        return Err(ConfigError::ConfidenceLevel(level));
    }

    let rp = &policy.recommendation;
    for (name, value) in [
        ("high_significance_pct", rp.high_significance_pct),
        ("medium_significance_pct", rp.medium_significance_pct),
    ] {
        if !(value.is_finite() && (0.0..=100.0).contains(&value)) {
            return Err(ConfigError::ThresholdRange { name, value });
        }
    }

    if rp.medium_significance_pct > rp.high_significance_pct {
        return Err(ConfigError::ThresholdOrder {
            medium: rp.medium_significance_pct,
            high: rp.high_significance_pct,
        });
    }
    Ok(())
}

/// Config with every key spelled out at its default, for `config init`.
pub fn default_config_file() -> ConfigFile {
    let policy = EvaluationPolicy::default();
    ConfigFile {
        defaults: DefaultsConfig {
            confidence_level: Some(policy.confidence_level_pct),
            out_dir: Some("artifacts/abgate".to_string()),
        },
        policy: PolicyConfig {
            min_sample_size: Some(policy.recommendation.min_sample_size),
            high_significance_pct: Some(policy.recommendation.high_significance_pct),
            medium_significance_pct: Some(policy.recommendation.medium_significance_pct),
        },
    }
}

/// Write via a temp file in the same directory, then rename over `path`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), AbgateError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| AbgateError::io(parent, e))?;

    let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    let written = fs::File::create(&tmp)
        .and_then(|mut f| {
            f.write_all(bytes)?;
            f.sync_all().ok();
            Ok(())
        })
        .map_err(|e| AbgateError::io(&tmp, e))
        .and_then(|()| fs::rename(&tmp, path).map_err(|e| AbgateError::io(path, e)));

    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}
