//! # Samplers
//!
//! A sampler decides whether a request that arrived without a forced
//! decision should be traced. Tracing every request is rarely affordable, so
//! production services usually cap the rate with [`QpsSampler`] or pick a
//! fraction with [`Sampler::Random`].
use crate::trace::id_generator::with_rng;
use crate::trace::{TraceError, TraceResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime};

/// Environment variable selecting the sampler.
pub const SAMPLER_ENV: &str = "CLOUD_TRACE_SAMPLER";
/// Environment variable carrying the sampler argument: the rate for `qps`,
/// the probability for `random`.
pub const SAMPLER_ARG_ENV: &str = "CLOUD_TRACE_SAMPLER_ARG";

/// The [`ShouldSample`] interface allows implementations to provide samplers
/// deciding whether a request is traced.
///
/// It is consulted once per request, and only when the request did not
/// arrive with a tracing decision already made upstream.
pub trait ShouldSample: Send + Sync + fmt::Debug {
    /// Returns `true` if the request should be traced.
    fn should_sample(&self) -> bool;
}

/// Default sampling options.
///
/// For more complex scenarios consider implementing your own sampler using
/// the [`ShouldSample`] trait.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Sampler {
    /// Always trace.
    AlwaysOn,
    /// Never trace.
    AlwaysOff,
    /// Trace when a uniform draw from `[0, 1)` is at most the given
    /// probability. The probability is clamped to `[0, 1]`.
    Random(f64),
    /// Trace at most a fixed number of requests per second.
    Qps(QpsSampler),
}

impl Sampler {
    /// Builds the sampler described by `config`.
    ///
    /// `cache` backs a QPS sampler; the process-wide in-memory cache is used
    /// when it is `None`.
    pub fn from_config(config: &SamplerConfig, cache: Option<Arc<dyn SamplerCache>>) -> Sampler {
        match config {
            SamplerConfig::Qps { rate, key } => {
                let mut sampler = QpsSampler::new(*rate);
                if let Some(cache) = cache {
                    sampler = sampler.with_cache(cache);
                }
                if let Some(key) = key {
                    sampler = sampler.with_key(key.clone());
                }
                Sampler::Qps(sampler)
            }
            SamplerConfig::Random { probability } => Sampler::Random(*probability),
            SamplerConfig::Enabled => Sampler::AlwaysOn,
            SamplerConfig::Disabled => Sampler::AlwaysOff,
        }
    }
}

impl ShouldSample for Sampler {
    fn should_sample(&self) -> bool {
        match self {
            Sampler::AlwaysOn => true,
            Sampler::AlwaysOff => false,
            Sampler::Random(probability) => {
                let probability = probability.clamp(0.0, 1.0);
                with_rng(|rng| rng.random::<f64>() <= probability)
            }
            Sampler::Qps(sampler) => sampler.should_sample(),
        }
    }
}

/// Stores the earliest time each QPS sampler may trace again.
///
/// Implementations are shared by every request in the process, or across
/// processes when backed by an external store. Reads and writes are separate
/// calls, so two requests racing on the same key may both be traced.
pub trait SamplerCache: Send + Sync + fmt::Debug {
    /// The next time a request may be traced under `key`.
    fn get(&self, key: &str) -> Option<SystemTime>;

    /// Records the next time a request may be traced under `key`.
    fn set(&self, key: &str, next: SystemTime);
}

/// A [`SamplerCache`] held in process memory.
#[derive(Debug, Default)]
pub struct InMemorySamplerCache {
    entries: Mutex<HashMap<String, SystemTime>>,
}

impl InMemorySamplerCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every sampler in the process that was not given
    /// one explicitly.
    pub fn global() -> Arc<InMemorySamplerCache> {
        static GLOBAL: OnceLock<Arc<InMemorySamplerCache>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                ct_info!(name: "InMemorySamplerCache.GlobalCreated");
                Arc::new(InMemorySamplerCache::new())
            })
            .clone()
    }
}

impl SamplerCache for InMemorySamplerCache {
    fn get(&self, key: &str) -> Option<SystemTime> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).copied())
    }

    fn set(&self, key: &str, next: SystemTime) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key.to_owned(), next);
            }
            Err(_) => {
                ct_warn!(name: "InMemorySamplerCache.Poisoned", key = key);
            }
        }
    }
}

/// Traces at most `rate` requests per second.
///
/// After tracing a request the sampler refuses until `1 / rate` seconds have
/// passed. The limit is best effort: concurrent requests may slip through
/// together.
///
/// # Examples
///
/// ```
/// use cloud_trace::trace::{InMemorySamplerCache, QpsSampler, ShouldSample};
/// use std::sync::Arc;
///
/// let sampler = QpsSampler::new(0.1).with_cache(Arc::new(InMemorySamplerCache::new()));
/// assert!(sampler.should_sample());
/// assert!(!sampler.should_sample());
/// ```
#[derive(Clone, Debug)]
pub struct QpsSampler {
    rate: f64,
    key: Cow<'static, str>,
    cache: Arc<dyn SamplerCache>,
}

impl QpsSampler {
    /// The rate used when none is configured: one request every ten seconds.
    pub const DEFAULT_RATE: f64 = 0.1;

    /// The cache key used when none is configured.
    pub const DEFAULT_KEY: &'static str = "__google_cloud_trace__";

    /// A sampler tracing at most `rate` requests per second. A rate that is
    /// not a positive finite number never traces.
    pub fn new(rate: f64) -> Self {
        QpsSampler {
            rate,
            key: Cow::Borrowed(Self::DEFAULT_KEY),
            cache: InMemorySamplerCache::global(),
        }
    }

    /// Uses `cache` for the shared state.
    pub fn with_cache(mut self, cache: Arc<dyn SamplerCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Uses `key` for the shared state, so independent limits can share a cache.
    pub fn with_key(mut self, key: impl Into<Cow<'static, str>>) -> Self {
        self.key = key.into();
        self
    }

    /// The configured rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Decides as if the current time were `now`.
    pub fn should_sample_at(&self, now: SystemTime) -> bool {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return false;
        }
        if let Some(next) = self.cache.get(&self.key) {
            if now < next {
                return false;
            }
        }
        let interval = Duration::try_from_secs_f64(1.0 / self.rate).unwrap_or(Duration::MAX);
        let next = match now.checked_add(interval) {
            Some(next) => next,
            None => {
                ct_debug!(name: "QpsSampler.IntervalOverflow", rate = self.rate);
                saturating_add(now, interval)
            }
        };
        self.cache.set(&self.key, next);
        true
    }
}

/// The latest representable time at most `interval` after `now`.
fn saturating_add(now: SystemTime, mut interval: Duration) -> SystemTime {
    loop {
        if let Some(next) = now.checked_add(interval) {
            return next;
        }
        if interval.is_zero() {
            return now;
        }
        interval /= 2;
    }
}

impl ShouldSample for QpsSampler {
    fn should_sample(&self) -> bool {
        self.should_sample_at(crate::time::now())
    }
}

fn default_qps_rate() -> f64 {
    QpsSampler::DEFAULT_RATE
}

/// Declarative sampler selection, as found in configuration files.
///
/// An unknown or missing `type` and a missing configuration all mean
/// [`SamplerConfig::Disabled`].
///
/// # Examples
///
/// ```
/// use cloud_trace::trace::SamplerConfig;
///
/// let config: SamplerConfig = serde_json::from_str(r#"{"type": "qps", "rate": 5}"#).unwrap();
/// assert_eq!(config, SamplerConfig::Qps { rate: 5.0, key: None });
///
/// let config: SamplerConfig = serde_json::from_str(r#"{"type": "sometimes"}"#).unwrap();
/// assert_eq!(config, SamplerConfig::Disabled);
///
/// let config: SamplerConfig = serde_json::from_str(r#"{"rate": 5}"#).unwrap();
/// assert_eq!(config, SamplerConfig::Disabled);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", try_from = "RawSamplerConfig")]
pub enum SamplerConfig {
    /// Rate-limited sampling, see [`QpsSampler`].
    Qps {
        /// Requests per second.
        #[serde(default = "default_qps_rate")]
        rate: f64,
        /// Cache key for the shared state.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },
    /// Probabilistic sampling, see [`Sampler::Random`].
    Random {
        /// The fraction of requests to trace.
        probability: f64,
    },
    /// Trace every request.
    Enabled,
    /// Trace nothing unless an upstream service asked for it.
    #[default]
    Disabled,
}

/// The untyped shape of a sampler configuration. Fields that the selected
/// `type` does not use are ignored.
#[derive(Deserialize)]
struct RawSamplerConfig {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    rate: Option<f64>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    probability: Option<f64>,
}

impl TryFrom<RawSamplerConfig> for SamplerConfig {
    type Error = String;

    fn try_from(raw: RawSamplerConfig) -> Result<Self, Self::Error> {
        Ok(match raw.kind.as_deref() {
            Some("qps") => SamplerConfig::Qps {
                rate: raw.rate.unwrap_or_else(default_qps_rate),
                key: raw.key,
            },
            Some("random") => SamplerConfig::Random {
                probability: raw
                    .probability
                    .ok_or_else(|| "missing field `probability`".to_string())?,
            },
            Some("enabled") => SamplerConfig::Enabled,
            _ => SamplerConfig::Disabled,
        })
    }
}

impl SamplerConfig {
    /// Parses a JSON sampler configuration.
    pub fn from_json(json: &str) -> TraceResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads the configuration from `CLOUD_TRACE_SAMPLER` and
    /// `CLOUD_TRACE_SAMPLER_ARG`.
    ///
    /// Unset means [`SamplerConfig::Disabled`]. An unknown sampler or an
    /// unusable argument is logged and also means disabled.
    pub fn from_env() -> Self {
        let Ok(sampler) = env::var(SAMPLER_ENV) else {
            return SamplerConfig::Disabled;
        };
        let arg = env::var(SAMPLER_ARG_ENV).ok();
        match Self::parse(&sampler, arg.as_deref()) {
            Ok(config) => config,
            Err(err) => {
                ct_warn!(
                    name: "SamplerConfig.InvalidEnvironment",
                    message = "CLOUD_TRACE_SAMPLER could not be used. Falling back to the disabled sampler. Valid values are: qps, random, enabled, disabled; qps and random take a number in CLOUD_TRACE_SAMPLER_ARG",
                    error = format!("{err}"),
                );
                SamplerConfig::Disabled
            }
        }
    }

    /// Builds a configuration from a sampler name and its optional argument.
    pub fn parse(sampler: &str, arg: Option<&str>) -> TraceResult<Self> {
        let number = |sampler: &'static str| {
            let arg = arg.unwrap_or_default();
            arg.trim()
                .parse::<f64>()
                .map_err(|source| TraceError::InvalidSamplerArg {
                    sampler,
                    arg: arg.to_owned(),
                    source,
                })
        };

        match sampler.trim().to_ascii_lowercase().as_str() {
            "qps" => Ok(SamplerConfig::Qps {
                rate: number("qps")?,
                key: None,
            }),
            "random" => Ok(SamplerConfig::Random {
                probability: number("random")?,
            }),
            "enabled" | "always_on" => Ok(SamplerConfig::Enabled),
            "disabled" | "always_off" => Ok(SamplerConfig::Disabled),
            other => Err(TraceError::UnknownSampler(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::UNIX_EPOCH;

    fn private_qps(rate: f64) -> QpsSampler {
        QpsSampler::new(rate).with_cache(Arc::new(InMemorySamplerCache::new()))
    }

    #[test]
    fn always_on_and_off() {
        assert!(Sampler::AlwaysOn.should_sample());
        assert!(!Sampler::AlwaysOff.should_sample());
    }

    #[rstest]
    #[case(0.0, 0)]
    #[case(-1.0, 0)]
    #[case(1.0, 1000)]
    #[case(5.0, 1000)]
    fn random_extremes(#[case] probability: f64, #[case] expected: usize) {
        let sampler = Sampler::Random(probability);
        let sampled = (0..1000).filter(|_| sampler.should_sample()).count();
        assert_eq!(sampled, expected);
    }

    #[test]
    fn random_half_is_roughly_half() {
        let sampler = Sampler::Random(0.5);
        let sampled = (0..10_000).filter(|_| sampler.should_sample()).count();
        assert!((4_000..6_000).contains(&sampled), "sampled {sampled}");
    }

    #[test]
    fn qps_limits_within_interval() {
        let sampler = private_qps(2.0);
        let t0 = UNIX_EPOCH + Duration::from_secs(1_000);

        assert!(sampler.should_sample_at(t0));
        assert!(!sampler.should_sample_at(t0 + Duration::from_millis(100)));
        assert!(!sampler.should_sample_at(t0 + Duration::from_millis(499)));
        assert!(sampler.should_sample_at(t0 + Duration::from_millis(500)));
        assert!(!sampler.should_sample_at(t0 + Duration::from_millis(600)));
    }

    #[rstest]
    #[case(0.0)]
    #[case(-3.0)]
    #[case(f64::NAN)]
    #[case(f64::INFINITY)]
    fn qps_with_unusable_rate_never_samples(#[case] rate: f64) {
        assert!(!private_qps(rate).should_sample_at(UNIX_EPOCH));
    }

    #[test]
    fn global_cache_is_shared() {
        let first = InMemorySamplerCache::global();
        let second = InMemorySamplerCache::global();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn qps_with_tiny_rate_samples_once() {
        let sampler = private_qps(1e-20);
        let t0 = UNIX_EPOCH + Duration::from_secs(1_000);

        assert!(sampler.should_sample_at(t0));
        assert!(!sampler.should_sample_at(t0 + Duration::from_millis(1)));
        assert!(!sampler.should_sample_at(t0 + Duration::from_millis(2)));
    }

    #[test]
    fn random_config_requires_probability() {
        assert!(SamplerConfig::from_json(r#"{"type": "random"}"#).is_err());
    }

    #[test]
    fn qps_keys_are_independent() {
        let cache: Arc<dyn SamplerCache> = Arc::new(InMemorySamplerCache::new());
        let a = QpsSampler::new(1.0).with_cache(cache.clone()).with_key("a");
        let b = QpsSampler::new(1.0).with_cache(cache.clone()).with_key("b");

        assert!(a.should_sample_at(UNIX_EPOCH));
        assert!(b.should_sample_at(UNIX_EPOCH));
        assert!(!a.should_sample_at(UNIX_EPOCH));
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn qps_shares_state_through_cache() {
        let cache: Arc<dyn SamplerCache> = Arc::new(InMemorySamplerCache::new());
        let first = QpsSampler::new(1.0).with_cache(cache.clone());
        let second = QpsSampler::new(1.0).with_cache(cache);

        assert!(first.should_sample_at(UNIX_EPOCH));
        assert!(!second.should_sample_at(UNIX_EPOCH + Duration::from_millis(10)));
    }

    #[rstest]
    #[case(SamplerConfig::Enabled, "AlwaysOn")]
    #[case(SamplerConfig::Disabled, "AlwaysOff")]
    #[case(SamplerConfig::Random { probability: 0.3 }, "Random(0.3)")]
    #[case(SamplerConfig::Qps { rate: 2.0, key: None }, "Qps")]
    fn factory_maps_config(#[case] config: SamplerConfig, #[case] expected: &str) {
        let sampler = Sampler::from_config(&config, None);
        assert!(format!("{sampler:?}").starts_with(expected));
    }

    #[test]
    fn factory_applies_qps_key_and_cache() {
        let cache: Arc<dyn SamplerCache> = Arc::new(InMemorySamplerCache::new());
        let config = SamplerConfig::Qps {
            rate: 1.0,
            key: Some("orders".into()),
        };

        let Sampler::Qps(sampler) = Sampler::from_config(&config, Some(cache.clone())) else {
            panic!("expected a QPS sampler");
        };
        assert!(sampler.should_sample());
        assert!(cache.get("orders").is_some());
        assert!(cache.get(QpsSampler::DEFAULT_KEY).is_none());
    }

    #[rstest]
    #[case(r#"{"type": "qps", "rate": 3.5, "key": "k"}"#, SamplerConfig::Qps { rate: 3.5, key: Some("k".into()) })]
    #[case(r#"{"type": "qps"}"#, SamplerConfig::Qps { rate: QpsSampler::DEFAULT_RATE, key: None })]
    #[case(r#"{"type": "random", "probability": 0.25}"#, SamplerConfig::Random { probability: 0.25 })]
    #[case(r#"{"type": "enabled"}"#, SamplerConfig::Enabled)]
    #[case(r#"{"type": "disabled"}"#, SamplerConfig::Disabled)]
    #[case(r#"{"type": "unknown"}"#, SamplerConfig::Disabled)]
    #[case(r#"{}"#, SamplerConfig::Disabled)]
    #[case(r#"{"rate": 5}"#, SamplerConfig::Disabled)]
    fn config_from_json(#[case] json: &str, #[case] expected: SamplerConfig) {
        assert_eq!(SamplerConfig::from_json(json).unwrap(), expected);
    }

    #[test]
    fn config_from_invalid_json() {
        assert!(matches!(
            SamplerConfig::from_json("{not json"),
            Err(TraceError::Config(_))
        ));
        assert_eq!(SamplerConfig::default(), SamplerConfig::Disabled);
    }

    #[test]
    fn config_from_env() {
        let cases = [
            (None, None, SamplerConfig::Disabled),
            (Some("qps"), Some("0.5"), SamplerConfig::Qps { rate: 0.5, key: None }),
            (Some("random"), Some("0.2"), SamplerConfig::Random { probability: 0.2 }),
            (Some("ENABLED"), None, SamplerConfig::Enabled),
            (Some("always_off"), None, SamplerConfig::Disabled),
            (Some("qps"), None, SamplerConfig::Disabled),
            (Some("random"), Some("lots"), SamplerConfig::Disabled),
            (Some("sometimes"), None, SamplerConfig::Disabled),
        ];

        for (sampler, arg, expected) in cases {
            let config = temp_env::with_vars(
                [(SAMPLER_ENV, sampler), (SAMPLER_ARG_ENV, arg)],
                SamplerConfig::from_env,
            );
            assert_eq!(config, expected, "sampler={sampler:?} arg={arg:?}");
        }
    }

    #[test]
    fn parse_reports_errors() {
        assert!(matches!(
            SamplerConfig::parse("qps", Some("fast")),
            Err(TraceError::InvalidSamplerArg { sampler: "qps", .. })
        ));
        assert!(matches!(
            SamplerConfig::parse("sometimes", None),
            Err(TraceError::UnknownSampler(name)) if name == "sometimes"
        ));
    }
}
