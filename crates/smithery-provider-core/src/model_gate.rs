use std::sync::Arc;

use crate::errors::ProxyError;

/// Read-only view of which models clients may use.
pub trait ModelVisibility: Send + Sync {
    fn is_hidden(&self, model: &str) -> bool;
    /// The full catalog in display order.
    fn known_models(&self) -> Vec<String>;
}

#[derive(Clone)]
pub struct ModelGate {
    source: Arc<dyn ModelVisibility>,
}

impl ModelGate {
    pub fn new(source: Arc<dyn ModelVisibility>) -> Self {
        Self { source }
    }

    pub fn is_visible(&self, model: &str) -> bool {
        !self.source.is_hidden(model)
    }

    /// Rejects hidden models before any credential is taken.
    pub fn check(&self, model: &str) -> Result<(), ProxyError> {
        if self.is_visible(model) {
            Ok(())
        } else {
            Err(ProxyError::ModelBlocked {
                model: model.to_string(),
            })
        }
    }

    pub fn filter_listing(&self, models: Vec<String>) -> Vec<String> {
        models
            .into_iter()
            .filter(|model| self.is_visible(model))
            .collect()
    }

    pub fn visible_models(&self) -> Vec<String> {
        self.filter_listing(self.source.known_models())
    }
}

impl std::fmt::Debug for ModelGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGate").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<&'static str>);

    impl ModelVisibility for Fixed {
        fn is_hidden(&self, model: &str) -> bool {
            self.0.contains(&model)
        }

        fn known_models(&self) -> Vec<String> {
            ["gpt-5", "gemini-2.5-pro", "kimi-k2"]
                .iter()
                .map(|m| m.to_string())
                .collect()
        }
    }

    #[test]
    fn hidden_models_are_blocked_and_unlisted() {
        let gate = ModelGate::new(Arc::new(Fixed(vec!["gemini-2.5-pro"])));

        assert!(gate.check("gpt-5").is_ok());
        assert!(matches!(
            gate.check("gemini-2.5-pro"),
            Err(ProxyError::ModelBlocked { .. })
        ));
        assert_eq!(gate.visible_models(), vec!["gpt-5", "kimi-k2"]);
    }

    #[test]
    fn unknown_models_pass_the_gate() {
        let gate = ModelGate::new(Arc::new(Fixed(Vec::new())));
        assert!(gate.is_visible("some-new-model"));
    }
}
