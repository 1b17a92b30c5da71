//! The machine registry — every version of one orchestrator, resolved
//! per event.

use crate::builder::Machine;
use axon_protocol::event::Event;
use axon_protocol::subject::SubjectContent;
use axon_protocol::violation::{TransactionCause, Violation};
use semver::Version;
use std::collections::BTreeMap;
use thiserror::Error;

/// Registry construction errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A registry needs at least one machine.
    #[error("registry needs at least one machine")]
    Empty,

    /// All machines in a registry must share one orchestrator source.
    #[error("machine {id:?} answers to {found:?}, registry answers to {expected:?}")]
    MixedSources {
        /// The offending machine id.
        id: String,
        /// Its source.
        found: String,
        /// The registry's source.
        expected: String,
    },

    /// Two machines were registered at the same version.
    #[error("duplicate machine version {0}")]
    DuplicateVersion(Version),
}

/// All machines sharing one orchestrator identity, keyed by version.
#[derive(Debug)]
pub struct MachineRegistry {
    source: String,
    machines: BTreeMap<Version, Machine>,
}

impl MachineRegistry {
    /// Build a registry. Every machine must share the same source, and
    /// versions must be unique.
    pub fn new(machines: Vec<Machine>) -> Result<Self, RegistryError> {
        let mut iter = machines.into_iter();
        let first = iter.next().ok_or(RegistryError::Empty)?;
        let source = first.source().to_string();
        let mut map = BTreeMap::new();
        map.insert(first.version().clone(), first);
        for machine in iter {
            if machine.source() != source {
                return Err(RegistryError::MixedSources {
                    id: machine.id().to_string(),
                    found: machine.source().to_string(),
                    expected: source,
                });
            }
            let version = machine.version().clone();
            if map.contains_key(&version) {
                return Err(RegistryError::DuplicateVersion(version));
            }
            map.insert(version, machine);
        }
        Ok(Self {
            source,
            machines: map,
        })
    }

    /// The orchestrator source all registered machines answer to.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The registered machines, oldest version first.
    pub fn machines(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }

    /// Resolve the machine for an event by parsing its subject.
    ///
    /// A name mismatch is a soft miss (`Ok(None)` — the event is not
    /// for this orchestrator); an unknown version is a config
    /// violation.
    pub fn resolve(&self, event: &Event) -> Result<Option<&Machine>, Violation> {
        let content = event
            .subject
            .parse()
            .map_err(|e| Violation::transaction(TransactionCause::InvalidSubject, e))?;
        self.resolve_content(&content)
    }

    /// Resolve from an already-parsed subject.
    pub fn resolve_content(
        &self,
        content: &SubjectContent,
    ) -> Result<Option<&Machine>, Violation> {
        if content.orchestrator.name != self.source {
            return Ok(None);
        }
        self.machines
            .get(&content.orchestrator.version)
            .map(Some)
            .ok_or_else(|| {
                Violation::config(format!(
                    "no machine registered for {:?} at version {}",
                    self.source, content.orchestrator.version
                ))
            })
    }
}
