//! Tracing configuration
//!
//! Configuration gathers what a [`RequestTracer`](crate::RequestTracer)
//! needs beyond the request itself. The defaults come from the environment.
use crate::trace::{IdGenerator, RandomIdGenerator, SamplerConfig};
use std::borrow::Cow;
use std::env;
use std::sync::Arc;

/// Environment variable naming the Google Cloud project.
pub const PROJECT_ID_ENV: &str = "GCLOUD_PROJECT";

/// The agent name reported in the `/agent` label.
pub const AGENT_NAME: &str = "cloud-trace-rs";

/// Tracer configuration
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
    /// How requests without an upstream decision are sampled.
    pub sampler: SamplerConfig,

    /// Generates trace and span ids.
    pub id_generator: Arc<dyn IdGenerator>,

    /// The project traces are reported under.
    pub project_id: Option<String>,

    /// The agent name reported on root spans.
    pub agent: Cow<'static, str>,
}

impl Config {
    /// Sets the sampler configuration.
    pub fn with_sampler(mut self, sampler: SamplerConfig) -> Self {
        self.sampler = sampler;
        self
    }

    /// Sets the id generator.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Arc::new(id_generator);
        self
    }

    /// Sets the project id.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Sets the agent name.
    pub fn with_agent(mut self, agent: impl Into<Cow<'static, str>>) -> Self {
        self.agent = agent.into();
        self
    }

    /// The agent name followed by the crate version, as reported in the
    /// `g.co/agent` label.
    pub fn agent_with_version(&self) -> String {
        format!("{} {}", self.agent, env!("CARGO_PKG_VERSION"))
    }
}

impl Default for Config {
    /// Reads `CLOUD_TRACE_SAMPLER`, `CLOUD_TRACE_SAMPLER_ARG` and
    /// `GCLOUD_PROJECT`.
    fn default() -> Self {
        Config {
            sampler: SamplerConfig::from_env(),
            id_generator: Arc::new(RandomIdGenerator::default()),
            project_id: env::var(PROJECT_ID_ENV).ok().filter(|p| !p.is_empty()),
            agent: Cow::Borrowed(AGENT_NAME),
        }
    }
}
