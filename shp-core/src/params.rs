//! Selection of the objects a subscription or list covers
use crate::buildrun::BUILD_RUN_LABEL;

/// Label and field selectors shared by subscriptions and lists
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filter {
    /// A selector to restrict the objects by their labels
    ///
    /// Defaults to everything if `None`.
    pub label_selector: Option<String>,
    /// A selector to restrict the objects by their fields
    ///
    /// Defaults to everything if `None`.
    pub field_selector: Option<String>,
    /// Server-side timeout for the subscription, in seconds
    pub timeout: Option<u32>,
}

impl Filter {
    /// Configure the label selector
    #[must_use]
    pub fn labels(mut self, label_selector: &str) -> Self {
        self.label_selector = Some(label_selector.to_string());
        self
    }

    /// Configure the field selector
    #[must_use]
    pub fn fields(mut self, field_selector: &str) -> Self {
        self.field_selector = Some(field_selector.to_string());
        self
    }

    /// Configure the server-side subscription timeout
    #[must_use]
    pub fn timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    /// Objects with the given name
    pub fn named(name: &str) -> Self {
        Self::default().fields(&format!("metadata.name={name}"))
    }

    /// Pods executing the given `BuildRun`
    pub fn for_build_run(name: &str) -> Self {
        Self::default().labels(&format!("{BUILD_RUN_LABEL}={name}"))
    }
}
