use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Deserialize;

/// Live-updateable settings for reader-flow health tracing and
/// configuration publishing.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Tick period of each reader-flow tracer. Zero disables tracing.
    /// Default: 0s (disabled).
    #[serde(default = "default_tracer_period", with = "humantime_serde")]
    pub tracer_period: Duration,

    /// Number of sample groups kept in the lag record. Default: 3.
    #[serde(default = "default_num_sample_groups")]
    pub lagging_metric_num_sample_groups: usize,

    /// Number of consecutive ticks per sample group. Default: 4.
    #[serde(default = "default_sample_group_size")]
    pub lagging_metric_sample_group_size: usize,

    /// Dimensionless lag-growth threshold above which a consumer is no
    /// longer considered to be catching up. Default: 0.1.
    #[serde(default = "default_slope_threshold")]
    pub lagging_slope_threshold: f64,

    /// Per-monitoring-tag ceiling on acceptable time lag. A reader whose
    /// lag exceeds any matching entry publishes samples at the unhealthy
    /// weight.
    #[serde(default, deserialize_with = "duration_map::deserialize")]
    pub max_acceptable_time_lag_per_tag: HashMap<String, Duration>,

    /// Sampling weight applied to trace samples from unhealthy readers.
    /// Default: 10.0.
    #[serde(default = "default_unhealthy_publish_weight")]
    pub unhealthy_publish_weight: f64,

    /// Minimum continuous duration of the stuck condition before STUCK is
    /// reported. Default: 2m.
    #[serde(default = "default_stuck_threshold", with = "humantime_serde")]
    pub stuck_threshold: Duration,

    /// Skip remote preemption checks in tail queries. Default: false.
    #[serde(default)]
    pub skip_remote_preemption_checks: bool,

    /// Whether the nodes-configuration manager is running at all.
    /// Default: true.
    #[serde(default = "default_true")]
    pub enable_nodes_configuration_manager: bool,

    /// Whether the manager-derived nodes configuration is authoritative.
    /// Default: false (the server-config-derived view wins).
    #[serde(default)]
    pub use_nodes_configuration_manager_nodes_configuration: bool,
}

impl Settings {
    /// Loads settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;

        let settings: Settings = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing settings file {}", path.display()))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validates settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.lagging_slope_threshold < 0.0 {
            bail!("lagging_slope_threshold must be non-negative");
        }

        if self.unhealthy_publish_weight < 0.0 {
            bail!("unhealthy_publish_weight must be non-negative");
        }

        Ok(())
    }

    /// Sample group size, clamped to at least one tick per group.
    pub fn sample_group_size(&self) -> usize {
        self.lagging_metric_sample_group_size.max(1)
    }

    /// Number of sample groups, clamped to at least one.
    pub fn num_sample_groups(&self) -> usize {
        self.lagging_metric_num_sample_groups.max(1)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tracer_period: default_tracer_period(),
            lagging_metric_num_sample_groups: default_num_sample_groups(),
            lagging_metric_sample_group_size: default_sample_group_size(),
            lagging_slope_threshold: default_slope_threshold(),
            max_acceptable_time_lag_per_tag: HashMap::new(),
            unhealthy_publish_weight: default_unhealthy_publish_weight(),
            stuck_threshold: default_stuck_threshold(),
            skip_remote_preemption_checks: false,
            enable_nodes_configuration_manager: true,
            use_nodes_configuration_manager_nodes_configuration: false,
        }
    }
}

fn default_tracer_period() -> Duration {
    Duration::ZERO
}

fn default_num_sample_groups() -> usize {
    3
}

fn default_sample_group_size() -> usize {
    4
}

fn default_slope_threshold() -> f64 {
    0.1
}

fn default_unhealthy_publish_weight() -> f64 {
    10.0
}

fn default_stuck_threshold() -> Duration {
    Duration::from_secs(120)
}

fn default_true() -> bool {
    true
}

/// Deserializes a map of tag to humantime duration ("30s", "5m").
mod duration_map {
    use std::collections::HashMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = HashMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(tag, value)| {
                humantime::parse_duration(&value)
                    .map(|d| (tag, d))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

type Subscriber = Box<dyn Fn() + Send + Sync>;
type Validator<T> = Box<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// A shared, atomically swappable value with change subscriptions.
///
/// Holds settings and configuration views that several components read
/// concurrently. `update` swaps the value and notifies subscribers;
/// subscribers must not block.
pub struct Updateable<T> {
    value: ArcSwap<T>,
    subscribers: Mutex<Vec<Subscriber>>,
    validator: Mutex<Option<Validator<T>>>,
}

impl<T> Updateable<T> {
    pub fn new(initial: T) -> Arc<Self> {
        Arc::new(Self {
            value: ArcSwap::from_pointee(initial),
            subscribers: Mutex::new(Vec::new()),
            validator: Mutex::new(None),
        })
    }

    /// Returns the current value.
    pub fn get(&self) -> Arc<T> {
        self.value.load_full()
    }

    /// Installs a hook that can reject candidate values in `update`.
    pub fn set_validator(&self, validator: impl Fn(&T) -> Result<()> + Send + Sync + 'static) {
        *self.validator.lock() = Some(Box::new(validator));
    }

    /// Registers a callback fired after every successful update.
    pub fn subscribe(&self, f: impl Fn() + Send + Sync + 'static) {
        self.subscribers.lock().push(Box::new(f));
    }

    /// Swaps in a new value and notifies subscribers.
    pub fn update(&self, value: Arc<T>) -> Result<()> {
        if let Some(validator) = self.validator.lock().as_ref() {
            validator(&value)?;
        }

        self.value.store(value);

        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.iter() {
            subscriber();
        }

        Ok(())
    }

    /// Convenience wrapper over `update` for owned values.
    pub fn set(&self, value: T) -> Result<()> {
        self.update(Arc::new(value))
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Updateable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updateable")
            .field("value", &self.value.load())
            .finish()
    }
}
