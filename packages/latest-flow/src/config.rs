use crate::Epoch;
use std::borrow::Cow;

/// What to do when a run that has already been superseded returns an error.
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub enum SupersededErrorPolicy {
    /// Fail the stream with the error regardless of which run raised it.
    #[default]
    Propagate,

    /// Drop errors from runs that are no longer current.
    Discard,
}

impl SupersededErrorPolicy {
    pub(crate) fn should_propagate(self, failed: Epoch, current: Epoch) -> bool {
        match self {
            SupersededErrorPolicy::Propagate => true,
            SupersededErrorPolicy::Discard => failed == current,
        }
    }
}

/// Settings for a [`crate::LatestFlowTransformer`].
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TransformerConfig {
    /// Name attached to every tracing span the transformer opens.
    pub label: Cow<'static, str>,

    /// How errors from superseded runs are handled.
    pub superseded_errors: SupersededErrorPolicy,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            label: Cow::Borrowed("transform_latest"),
            superseded_errors: SupersededErrorPolicy::default(),
        }
    }
}

impl TransformerConfig {
    /// Same as [`TransformerConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the label used in tracing spans.
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = label.into();
        self
    }

    /// Set how errors from superseded runs are handled.
    pub fn with_superseded_errors(mut self, policy: SupersededErrorPolicy) -> Self {
        self.superseded_errors = policy;
        self
    }
}
