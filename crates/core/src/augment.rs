//! Capability-driven session decoration.
//!
//! Sessions whose capabilities announce extra features (vendor extensions,
//! protocol add-ons) get wrapped with the matching behavior at creation
//! time. Plain interface composition: a registry maps a predicate over
//! capabilities to a decorator, no runtime reflection involved.

use std::sync::Arc;

use sgrid_protocol::Capabilities;

use crate::slots::SessionHandle;

/// Wraps a session handle with additional behavior.
pub trait SessionDecorator: Send + Sync {
    fn decorate(&self, session: Box<dyn SessionHandle>) -> Box<dyn SessionHandle>;
}

type Predicate = Box<dyn Fn(&Capabilities) -> bool + Send + Sync>;

struct AugmenterEntry {
    predicate: Predicate,
    decorator: Arc<dyn SessionDecorator>,
}

/// Registry of capability predicates and the decorators they enable.
///
/// Decorators apply in registration order; a session matching several
/// predicates is wrapped by each in turn.
#[derive(Default)]
pub struct Augmenter {
    entries: Vec<AugmenterEntry>,
}

impl Augmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a decorator for sessions whose capabilities satisfy
    /// `predicate`.
    pub fn register<F>(&mut self, predicate: F, decorator: Arc<dyn SessionDecorator>) -> &mut Self
    where
        F: Fn(&Capabilities) -> bool + Send + Sync + 'static,
    {
        self.entries.push(AugmenterEntry {
            predicate: Box::new(predicate),
            decorator,
        });
        self
    }

    /// Applies every matching decorator to the session.
    pub fn augment(
        &self,
        capabilities: &Capabilities,
        session: Box<dyn SessionHandle>,
    ) -> Box<dyn SessionHandle> {
        self.entries
            .iter()
            .filter(|entry| (entry.predicate)(capabilities))
            .fold(session, |session, entry| entry.decorator.decorate(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct PlainSession {
        capabilities: Capabilities,
    }

    impl SessionHandle for PlainSession {
        fn capabilities(&self) -> &Capabilities {
            &self.capabilities
        }
    }

    struct Tagged {
        _inner: Box<dyn SessionHandle>,
        capabilities: Capabilities,
    }

    impl SessionHandle for Tagged {
        fn capabilities(&self) -> &Capabilities {
            &self.capabilities
        }
    }

    struct TagDecorator {
        tag: &'static str,
    }

    impl SessionDecorator for TagDecorator {
        fn decorate(&self, session: Box<dyn SessionHandle>) -> Box<dyn SessionHandle> {
            let mut map = session.capabilities().as_map().clone();
            map.insert("decorated".to_string(), json!(self.tag));
            Box::new(Tagged {
                capabilities: Capabilities::from_map(map),
                _inner: session,
            })
        }
    }

    fn caps(value: serde_json::Value) -> Capabilities {
        Capabilities::from_value(&value).unwrap()
    }

    #[test]
    fn only_matching_decorators_apply() {
        let mut augmenter = Augmenter::new();
        augmenter.register(
            |caps| caps.get("vendor:feature").is_some(),
            Arc::new(TagDecorator { tag: "feature" }),
        );

        let plain = caps(json!({"browserName": "chrome"}));
        let session = augmenter.augment(
            &plain,
            Box::new(PlainSession {
                capabilities: plain.clone(),
            }),
        );
        assert!(session.capabilities().get("decorated").is_none());

        let featured = caps(json!({"browserName": "chrome", "vendor:feature": true}));
        let session = augmenter.augment(
            &featured,
            Box::new(PlainSession {
                capabilities: featured.clone(),
            }),
        );
        assert_eq!(session.capabilities().get("decorated"), Some(&json!("feature")));
    }
}
