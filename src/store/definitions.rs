//! In-memory flow definition store.

use super::{DefinitionStore, StoreResult};
use crate::error::{DefinitionError, StoreError};
use crate::flows::{DefinitionFile, FlowDefinition, FlowGraph};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of loading a batch of definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Ids of flows that validated.
    pub loaded: Vec<String>,
    /// Flows excluded from matching, with every problem found.
    pub rejected: Vec<(String, Vec<DefinitionError>)>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Flow graphs keyed by flow id.
#[derive(Debug, Default)]
pub struct InMemoryDefinitionStore {
    flows: RwLock<HashMap<String, Arc<FlowGraph>>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from definitions, keeping only the valid ones.
    pub fn from_definitions(definitions: Vec<FlowDefinition>) -> (Self, LoadReport) {
        let store = Self::new();
        let report = store.load(definitions);
        (store, report)
    }

    /// Load a JSON5 definition file.
    pub async fn from_file(path: &Path) -> Result<(Self, LoadReport), StoreError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let file = parse_definitions(&raw).map_err(|reason| StoreError::Parse {
            path: path.display().to_string(),
            reason,
        })?;

        let (store, report) = Self::from_definitions(file.flows);
        info!(
            path = %path.display(),
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            "loaded flow definitions"
        );
        Ok((store, report))
    }

    /// Replace the whole set of flows.
    ///
    /// Invalid flows are logged and left out; a later flow reusing an id
    /// already seen in the batch is rejected.
    pub fn load(&self, definitions: Vec<FlowDefinition>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut seen = HashSet::new();
        let mut flows = HashMap::new();

        for definition in definitions {
            let id = definition.id.clone();
            if !seen.insert(id.clone()) {
                warn!(flow_id = %id, "duplicate flow id, skipping");
                report
                    .rejected
                    .push((id.clone(), vec![DefinitionError::DuplicateFlow { flow: id }]));
                continue;
            }

            match compile(definition) {
                Ok(graph) => {
                    report.loaded.push(id.clone());
                    flows.insert(id, graph);
                }
                Err(errors) => report.rejected.push((id, errors)),
            }
        }

        *self.flows.write() = flows;
        report
    }

    /// Add or replace one flow.
    ///
    /// An invalid replacement removes the previous version, so a broken flow
    /// is never matched.
    pub fn upsert(&self, definition: FlowDefinition) -> Result<Arc<FlowGraph>, Vec<DefinitionError>> {
        let id = definition.id.clone();
        match compile(definition) {
            Ok(graph) => {
                self.flows.write().insert(id, Arc::clone(&graph));
                Ok(graph)
            }
            Err(errors) => {
                self.flows.write().remove(&id);
                Err(errors)
            }
        }
    }

    pub fn remove(&self, flow_id: &str) -> Option<Arc<FlowGraph>> {
        self.flows.write().remove(flow_id)
    }

    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.read().is_empty()
    }

    /// All flows sorted by id.
    pub fn all(&self) -> Vec<Arc<FlowGraph>> {
        let mut flows: Vec<_> = self.flows.read().values().cloned().collect();
        flows.sort_by(|a, b| a.id().cmp(b.id()));
        flows
    }
}

/// Parse the JSON5 definition file format.
pub fn parse_definitions(raw: &str) -> Result<DefinitionFile, String> {
    json5::from_str(raw).map_err(|e| e.to_string())
}

fn compile(definition: FlowDefinition) -> Result<Arc<FlowGraph>, Vec<DefinitionError>> {
    let errors = FlowGraph::validate(&definition);
    if !errors.is_empty() {
        for error in &errors {
            warn!(flow_id = %definition.id, error = %error, "flow definition rejected");
        }
        return Err(errors);
    }

    if definition.is_active && !definition.is_default && definition.triggers.is_empty() {
        warn!(
            flow_id = %definition.id,
            "active flow has no triggers and is not the default; it can only be started explicitly"
        );
    }

    FlowGraph::build(definition)
        .map(Arc::new)
        .map_err(|e| vec![e])
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn flow(&self, flow_id: &str) -> StoreResult<Option<Arc<FlowGraph>>> {
        Ok(self.flows.read().get(flow_id).cloned())
    }

    async fn active_flows(&self) -> StoreResult<Vec<Arc<FlowGraph>>> {
        Ok(self.all().into_iter().filter(|f| f.is_active()).collect())
    }
}
