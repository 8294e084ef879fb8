use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use crate::flowfile::{FlowFileRecord, ResourceClaim};

/// Kind of change conveyed to the flow file repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryRecordType {
    /// The record is removed from the flow entirely.
    Delete,
}

/// A repository mutation produced by the queue. Drop workers emit one
/// `Delete` record per dropped flow file; the repository releases the
/// attached content claims as part of persisting the deletion.
#[derive(Debug, Clone)]
pub struct RepositoryRecord {
    pub record_type: RepositoryRecordType,
    pub queue_identifier: String,
    pub flowfile: Arc<FlowFileRecord>,
}

impl RepositoryRecord {
    pub fn delete(queue_identifier: impl Into<String>, flowfile: Arc<FlowFileRecord>) -> Self {
        Self {
            record_type: RepositoryRecordType::Delete,
            queue_identifier: queue_identifier.into(),
            flowfile,
        }
    }
}

/// Durable store of flow file metadata. `update_repository` must not
/// return until the records are durable; the queue reports a drop request
/// COMPLETE only after this call succeeds.
pub trait FlowFileRepository: Send + Sync {
    fn update_repository(&self, records: Vec<RepositoryRecord>) -> io::Result<()>;
}

/// Lineage event kinds the queue emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvenanceEventType {
    Drop,
}

/// The content claim a record held before the event, flattened for the
/// provenance record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousContentClaim {
    pub container: String,
    pub section: String,
    pub resource_id: String,
    pub offset: u64,
    pub size: u64,
}

/// A single lineage event.
#[derive(Debug, Clone)]
pub struct ProvenanceEvent {
    pub event_type: ProvenanceEventType,
    pub flowfile_id: u64,
    pub component_id: String,
    pub component_type: String,
    pub source_queue_identifier: String,
    pub lineage_start_ms: i64,
    pub attributes: HashMap<String, String>,
    pub details: String,
    pub previous_claim: Option<PreviousContentClaim>,
}

impl ProvenanceEvent {
    pub fn builder(event_type: ProvenanceEventType) -> ProvenanceEventBuilder {
        ProvenanceEventBuilder::new(event_type)
    }
}

/// Builder for [`ProvenanceEvent`].
#[derive(Debug, Clone)]
pub struct ProvenanceEventBuilder {
    event: ProvenanceEvent,
}

impl ProvenanceEventBuilder {
    pub fn new(event_type: ProvenanceEventType) -> Self {
        Self {
            event: ProvenanceEvent {
                event_type,
                flowfile_id: 0,
                component_id: String::new(),
                component_type: String::new(),
                source_queue_identifier: String::new(),
                lineage_start_ms: 0,
                attributes: HashMap::new(),
                details: String::new(),
                previous_claim: None,
            },
        }
    }

    /// Copies identity, lineage, attributes and claim from a record.
    pub fn from_flowfile(mut self, record: &FlowFileRecord) -> Self {
        self.event.flowfile_id = record.id().as_u64();
        self.event.lineage_start_ms = record.lineage_start_ms();
        self.event.attributes = record.attributes().clone();
        self.event.previous_claim = record.content_claim().map(|claim| PreviousContentClaim {
            container: claim.resource_claim.container.clone(),
            section: claim.resource_claim.section.clone(),
            resource_id: claim.resource_claim.id.clone(),
            offset: claim.offset,
            size: record.size(),
        });
        self
    }

    pub fn component_id(mut self, component_id: impl Into<String>) -> Self {
        self.event.component_id = component_id.into();
        self
    }

    pub fn component_type(mut self, component_type: impl Into<String>) -> Self {
        self.event.component_type = component_type.into();
        self
    }

    pub fn source_queue_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.event.source_queue_identifier = identifier.into();
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.event.details = details.into();
        self
    }

    pub fn build(self) -> ProvenanceEvent {
        self.event
    }
}

/// Durable store of lineage events.
pub trait ProvenanceEventRepository: Send + Sync {
    fn register_events(&self, events: Vec<ProvenanceEvent>) -> io::Result<()>;
}

/// Reference counting authority for resource claims. The queue decrements
/// a claim exactly once for each record it drops.
pub trait ResourceClaimManager: Send + Sync {
    fn decrement_claimant_count(&self, claim: &ResourceClaim);
}
