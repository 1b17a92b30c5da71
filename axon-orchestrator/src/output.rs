//! The domain-segregated return shape of one pipeline invocation.

use axon_protocol::event::{DEFAULT_DOMAIN, DomainedEvent, Event};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every produced event, segregated by broadcast domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DomainedEvents {
    /// Every produced event, exactly once, in production order.
    pub all: Vec<Event>,
    /// The events tagged with each domain. An event tagged with several
    /// domains appears in each of its buckets.
    pub by_domain: BTreeMap<String, Vec<Event>>,
}

impl DomainedEvents {
    /// The events tagged with the given domain.
    pub fn domain(&self, name: &str) -> &[Event] {
        self.by_domain.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The events tagged `default`.
    pub fn default_domain(&self) -> &[Event] {
        self.domain(DEFAULT_DOMAIN)
    }
}

/// What one `execute` call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExecutionOutput {
    /// The events tagged `default` — what a plain broker wiring emits.
    pub events: Vec<Event>,
    /// The distinct domain tags used, sorted.
    pub all_event_domains: Vec<String>,
    /// The full domain segregation.
    pub domained_events: DomainedEvents,
}

impl ExecutionOutput {
    /// The empty result: nothing produced, nothing persisted.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Segregate produced events into the return shape.
    pub fn from_domained(produced: Vec<DomainedEvent>) -> Self {
        let mut all = Vec::with_capacity(produced.len());
        let mut by_domain: BTreeMap<String, Vec<Event>> = BTreeMap::new();
        for item in produced {
            for domain in &item.domains {
                by_domain
                    .entry(domain.clone())
                    .or_default()
                    .push(item.event.clone());
            }
            all.push(item.event);
        }
        Self {
            events: by_domain.get(DEFAULT_DOMAIN).cloned().unwrap_or_default(),
            all_event_domains: by_domain.keys().cloned().collect(),
            domained_events: DomainedEvents { all, by_domain },
        }
    }

    /// Whether this invocation produced nothing.
    pub fn is_empty(&self) -> bool {
        self.domained_events.all.is_empty()
    }
}
