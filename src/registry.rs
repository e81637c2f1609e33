//! Plugin registry.
//!
//! Everything pluggable is registered here explicitly at init time: sender
//! factories, startup processors, interactions, administrators, collectors,
//! and the host collaborators (notifier, consent prompt, process control).

use std::sync::Arc;

use thiserror::Error;

use crate::administrator::ReportingAdministrator;
use crate::builder::ReportBuilder;
use crate::collector::{default_collectors, Collector};
use crate::config::ReporterConfig;
use crate::interaction::{interactions_for, ReportInteraction};
use crate::limiter::{LimiterStartupProcessor, LimitingAdministrator};
use crate::notify::{ConsentPrompt, LoggingPrompt, Notifier, TracingNotifier};
use crate::process::{ProcessControl, StdProcess};
use crate::retry::{policy_for, RetryPolicy};
use crate::sender::{HttpSenderFactory, MailSenderFactory, ReportSenderFactory};
use crate::startup::{OldVersionStartupProcessor, StartupProcessor, UnapprovedStartupProcessor};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin misconfigured: {0}")]
    Config(String),

    #[error("plugin failed: {0}")]
    Failed(String),
}

/// Adds data to a builder before collection starts.
pub trait ReportPrimer: Send + Sync {
    fn prime_report(&self, builder: &mut ReportBuilder);
}

/// Typed lists of plugins.
pub struct PluginRegistry {
    pub sender_factories: Vec<Arc<dyn ReportSenderFactory>>,
    pub startup_processors: Vec<Arc<dyn StartupProcessor>>,
    pub interactions: Vec<Arc<dyn ReportInteraction>>,
    pub administrators: Vec<Arc<dyn ReportingAdministrator>>,
    pub collectors: Vec<Arc<dyn Collector>>,
    /// Overrides `config.retry_policy` when set.
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub primer: Option<Arc<dyn ReportPrimer>>,
    pub notifier: Arc<dyn Notifier>,
    pub consent_prompt: Arc<dyn ConsentPrompt>,
    pub process: Arc<dyn ProcessControl>,
}

impl PluginRegistry {
    /// An empty registry with logging collaborators and the standard process
    /// control.
    pub fn empty() -> Self {
        Self {
            sender_factories: Vec::new(),
            startup_processors: Vec::new(),
            interactions: Vec::new(),
            administrators: Vec::new(),
            collectors: Vec::new(),
            retry_policy: None,
            primer: None,
            notifier: Arc::new(TracingNotifier),
            consent_prompt: Arc::new(LoggingPrompt),
            process: Arc::new(StdProcess::new()),
        }
    }

    /// The built-in plugins for `config`.
    ///
    /// Host collaborators should be set with the `with_*` methods before
    /// this is called, since the built-in interactions capture them.
    pub fn with_defaults(config: &ReporterConfig) -> Self {
        Self::empty().register_defaults(config)
    }

    /// Registers the built-in plugins on top of what is already here.
    pub fn register_defaults(mut self, config: &ReporterConfig) -> Self {
        let root = config.report_root();
        self.sender_factories.push(Arc::new(HttpSenderFactory));
        self.sender_factories.push(Arc::new(MailSenderFactory::default()));
        self.startup_processors.push(Arc::new(OldVersionStartupProcessor::new(&root)));
        self.startup_processors.push(Arc::new(UnapprovedStartupProcessor));
        self.startup_processors.push(Arc::new(LimiterStartupProcessor::new(&root)));
        self.interactions
            .extend(interactions_for(config.interaction, &self.notifier, &self.consent_prompt));
        self.administrators
            .push(Arc::new(LimitingAdministrator::new(&root, Arc::clone(&self.notifier))));
        self.collectors.extend(default_collectors());
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_consent_prompt(mut self, prompt: Arc<dyn ConsentPrompt>) -> Self {
        self.consent_prompt = prompt;
        self
    }

    pub fn with_process_control(mut self, process: Arc<dyn ProcessControl>) -> Self {
        self.process = process;
        self
    }

    pub fn with_primer(mut self, primer: Arc<dyn ReportPrimer>) -> Self {
        self.primer = Some(primer);
        self
    }

    pub fn with_retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn sender_factory(mut self, factory: Arc<dyn ReportSenderFactory>) -> Self {
        self.sender_factories.push(factory);
        self
    }

    pub fn startup_processor(mut self, processor: Arc<dyn StartupProcessor>) -> Self {
        self.startup_processors.push(processor);
        self
    }

    pub fn interaction(mut self, interaction: Arc<dyn ReportInteraction>) -> Self {
        self.interactions.push(interaction);
        self
    }

    pub fn administrator(mut self, administrator: Arc<dyn ReportingAdministrator>) -> Self {
        self.administrators.push(administrator);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// The retry policy in effect.
    pub fn retry_policy_for(&self, config: &ReporterConfig) -> Arc<dyn RetryPolicy> {
        match &self.retry_policy {
            Some(policy) => Arc::clone(policy),
            None => policy_for(config.retry_policy),
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, InteractionMode, RetryPolicyKind};
    use crate::retry::NeverRetryPolicy;

    #[test]
    fn defaults_follow_interaction_mode() {
        let silent = ConfigBuilder::new("editor", "1.0.0").build().unwrap();
        assert!(PluginRegistry::with_defaults(&silent).interactions.is_empty());

        let dialog = ConfigBuilder::new("editor", "1.0.0")
            .interaction(InteractionMode::Dialog)
            .dialog_text("Send?")
            .build()
            .unwrap();
        let registry = PluginRegistry::with_defaults(&dialog);
        assert_eq!(registry.interactions.len(), 1);
        assert_eq!(registry.interactions[0].name(), "consent");
        assert_eq!(registry.sender_factories.len(), 2);
        assert_eq!(registry.startup_processors.len(), 3);
        assert!(!registry.collectors.is_empty());
    }

    #[test]
    fn explicit_retry_policy_overrides_config() {
        let config = ConfigBuilder::new("editor", "1.0.0")
            .retry_policy(RetryPolicyKind::Default)
            .build()
            .unwrap();
        let registry = PluginRegistry::empty().with_retry_policy(Arc::new(NeverRetryPolicy));

        let policy = registry.retry_policy_for(&config);
        assert!(!policy.should_retry_send(&[], &[]));
    }
}
