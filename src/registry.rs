//! Detector registry: an ordered collection of detector functions, each
//! wrapped so an internal failure costs one detector's output, never the
//! pipeline.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;

use crate::detectors::ner::NameRecognizer;
use crate::detectors::{address, domain, identifiers, ner, phi, rules, secrets};
use crate::entity::{EntityType, Span};

type DetectorFn = Box<dyn Fn(&str, &BTreeSet<EntityType>) -> Result<Vec<Span>> + Send + Sync>;

#[derive(Default)]
pub struct DetectorRegistry {
    detectors: Vec<(String, DetectorFn)>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, detector: F)
    where
        F: Fn(&str, &BTreeSet<EntityType>) -> Result<Vec<Span>> + Send + Sync + 'static,
    {
        self.detectors.push((name.to_string(), Box::new(detector)));
    }

    /// Registered detector names, in run order.
    pub fn names(&self) -> Vec<&str> {
        self.detectors.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Run every detector over `text`, concatenating spans in registration
    /// order. A detector error is swallowed into an empty contribution.
    pub fn run_selected(&self, text: &str, selected: &BTreeSet<EntityType>) -> Vec<Span> {
        let mut results = Vec::new();
        for (_, detector) in &self.detectors {
            results.extend(detector(text, selected).unwrap_or_default());
        }
        results
    }
}

/// The standard detector lineup. The NER slot takes an optional backend;
/// without one it contributes nothing.
pub fn build_default_registry(ner_backend: Option<Arc<dyn NameRecognizer>>) -> DetectorRegistry {
    let mut registry = DetectorRegistry::new();
    registry.register("rules", rules::detect_entities_rules);
    registry.register("ner", move |text, selected| {
        ner::detect_person_names(text, selected, ner_backend.as_deref())
    });
    registry.register("address", address::detect_addresses);
    registry.register("secrets", secrets::detect_secrets);
    registry.register("identifiers", identifiers::detect_identifiers);
    registry.register("phi", phi::detect_phi);
    registry.register("domain", domain::detect_domain_sensitive);
    registry
}
