//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level streaming configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Worker pool and manager thread settings.
    pub scheduler: SchedulerConfig,
    /// Integration queue pacing.
    pub integration: IntegrationConfig,
    /// Scene and level-of-detail settings.
    pub scene: SceneConfig,
    /// Parameters baked into every block key.
    pub generation: GenerationConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Generation worker threads. 0 = number of cores minus two, at least one.
    pub worker_threads: usize,
    /// Name of the thread that serializes scene updates.
    pub manager_thread_name: String,
}

/// Integration queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntegrationConfig {
    /// Payloads handed to the sink per tick.
    pub items_per_tick: usize,
    /// Minimum milliseconds between two integration batches.
    pub frame_delay_ms: u64,
}

/// Scene configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SceneConfig {
    /// Minimum milliseconds between two camera-driven scene updates.
    pub scene_update_delay_ms: u64,
    /// Number of resolution levels in the dataset.
    pub num_levels: u32,
    /// Block edge length at the finest level, in dataset cells.
    pub renderer_block_size: i64,
    /// Camera distance below which a block of level `i + 1` is split into
    /// level `i` children.
    pub level_thresholds: Vec<f64>,
    /// Finest level a scene may request.
    pub finest_level: u32,
    /// Coarsest level a scene may request.
    pub coarsest_level: u32,
}

/// Generation parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub simplification_iterations: u32,
    pub smoothing_lambda: f64,
    pub smoothing_iterations: u32,
    pub min_label_ratio: f64,
}

/// Debug configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level filter (e.g., "info", "debug", "lodstream_scheduler=trace").
    pub log_level: String,
    /// Run whole-state consistency checks after every mutation, even in
    /// release builds.
    pub check_invariants: bool,
}

// --- Default implementations ---

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            manager_thread_name: "lodstream-manager".to_string(),
        }
    }
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            items_per_tick: 16,
            frame_delay_ms: 16,
        }
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            scene_update_delay_ms: 100,
            num_levels: 4,
            renderer_block_size: 32,
            level_thresholds: vec![150.0, 400.0, 1000.0],
            finest_level: 0,
            coarsest_level: 3,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            simplification_iterations: 0,
            smoothing_lambda: 0.5,
            smoothing_iterations: 5,
            min_label_ratio: 0.25,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            check_invariants: false,
        }
    }
}

impl SceneConfig {
    /// Coarsest level clamped to the dataset, never finer than `finest_level`.
    pub fn clamped_coarsest_level(&self) -> u32 {
        self.coarsest_level
            .min(self.num_levels.saturating_sub(1))
            .max(self.finest_level)
    }

    /// Split threshold for blocks of `level`, or `None` if `level` never splits.
    pub fn split_distance(&self, level: u32) -> Option<f64> {
        if level <= self.finest_level || level == 0 {
            return None;
        }
        self.level_thresholds.get(level as usize - 1).copied()
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Platform config directory for lodstream, e.g. `~/.config/lodstream`.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lodstream"))
    }

    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::read(&config_path))?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::write(config_dir))?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::write(&config_path))?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::read(&config_path))?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Defaults serialize to readable RON.
    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("items_per_tick: 16"));
        assert!(ron_str.contains("manager_thread_name: \"lodstream-manager\""));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    /// A missing section falls back to its defaults.
    #[test]
    fn test_missing_field_uses_default() {
        let ron_str = "(scheduler: (), integration: (), debug: ())";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.scene, SceneConfig::default());
        assert_eq!(config.generation, GenerationConfig::default());
    }

    /// Partially written sections keep the remaining defaults.
    #[test]
    fn test_partial_section() {
        let ron_str = "(integration: (items_per_tick: 4))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.integration.items_per_tick, 4);
        assert_eq!(config.integration.frame_delay_ms, 16);
    }

    #[test]
    fn test_extra_field_ignored() {
        let ron_str = "(scheduler: (worker_threads: 3, thread_priority: 2))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.scheduler.worker_threads, 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.scene.level_thresholds = vec![10.0, 20.0];
        config.debug.check_invariants = true;
        config.save(dir.path()).unwrap();

        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("lodstream");
        let config = Config::load_or_create(&nested).unwrap();
        assert_eq!(config, Config::default());
        assert!(nested.join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut changed = config.clone();
        changed.integration.frame_delay_ms = 33;
        changed.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap();
        assert_eq!(reloaded, Some(changed));
    }

    /// Read failures name the file.
    #[test]
    fn test_reload_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::default().reload(dir.path()).unwrap_err();
        assert!(matches!(&err, ConfigError::ReadError { path, .. } if path.ends_with(CONFIG_FILE)));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert_eq!(config.reload(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_invalid_ron_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "(scheduler: (worker_threads: \"many\"))")
            .unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    /// Hand-edited files may carry comments.
    #[test]
    fn test_ron_with_comments() {
        let ron_str = r#"(
            // fewer workers on laptops
            scheduler: (worker_threads: 2),
        )"#;
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.scheduler.worker_threads, 2);
    }

    #[test]
    fn test_split_distance() {
        let scene = SceneConfig::default();
        assert_eq!(scene.split_distance(0), None);
        assert_eq!(scene.split_distance(1), Some(150.0));
        assert_eq!(scene.split_distance(3), Some(1000.0));
        assert_eq!(scene.split_distance(4), None);

        let capped = SceneConfig {
            finest_level: 2,
            ..SceneConfig::default()
        };
        assert_eq!(capped.split_distance(2), None);
        assert_eq!(capped.split_distance(3), Some(1000.0));
    }

    #[test]
    fn test_clamped_coarsest_level() {
        let scene = SceneConfig {
            num_levels: 2,
            coarsest_level: 5,
            ..SceneConfig::default()
        };
        assert_eq!(scene.clamped_coarsest_level(), 1);

        let inverted = SceneConfig {
            finest_level: 3,
            coarsest_level: 1,
            ..SceneConfig::default()
        };
        assert_eq!(inverted.clamped_coarsest_level(), 3);
    }
}
