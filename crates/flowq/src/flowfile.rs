use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::FlowFileId;

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::ZERO)
        .as_millis() as i64
}

/// Identity of a content container slice shared by one or more flow files.
///
/// Resource claims are owned by an external claim manager that reference
/// counts them; the queue decrements a claim exactly once when it drops the
/// flow file holding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceClaim {
    pub container: String,
    pub section: String,
    pub id: String,
}

impl ResourceClaim {
    pub fn new(
        container: impl Into<String>,
        section: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            container: container.into(),
            section: section.into(),
            id: id.into(),
        }
    }
}

/// A flow file's handle onto content: a resource claim plus the offset of
/// this flow file's content within the claimed resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentClaim {
    pub resource_claim: Arc<ResourceClaim>,
    pub offset: u64,
}

impl ContentClaim {
    pub fn new(resource_claim: Arc<ResourceClaim>, offset: u64) -> Self {
        Self {
            resource_claim,
            offset,
        }
    }
}

/// A unit of work buffered by the queue.
///
/// Records are immutable from the queue's point of view; attribute and
/// content mutation happens in the external repositories between queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowFileRecord {
    id: FlowFileId,
    entry_date_ms: i64,
    lineage_start_ms: i64,
    penalty_expiration_ms: i64,
    size: u64,
    content_claim: Option<ContentClaim>,
    content_claim_offset: u64,
    attributes: HashMap<String, String>,
}

impl FlowFileRecord {
    pub fn builder(id: FlowFileId) -> FlowFileRecordBuilder {
        FlowFileRecordBuilder::new(id)
    }

    #[inline]
    pub fn id(&self) -> FlowFileId {
        self.id
    }

    /// Millisecond timestamp at which the record entered the flow.
    #[inline]
    pub fn entry_date_ms(&self) -> i64 {
        self.entry_date_ms
    }

    /// Millisecond timestamp at which the record's lineage began.
    #[inline]
    pub fn lineage_start_ms(&self) -> i64 {
        self.lineage_start_ms
    }

    /// Absolute millisecond timestamp until which the record is penalized;
    /// zero (or any past time) means not penalized.
    #[inline]
    pub fn penalty_expiration_ms(&self) -> i64 {
        self.penalty_expiration_ms
    }

    /// Content size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn content_claim(&self) -> Option<&ContentClaim> {
        self.content_claim.as_ref()
    }

    /// Offset of this record's content within its content claim.
    #[inline]
    pub fn content_claim_offset(&self) -> u64 {
        self.content_claim_offset
    }

    #[inline]
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Whether the record is currently deferred by a penalty.
    pub fn is_penalized(&self) -> bool {
        self.penalty_expiration_ms > now_millis()
    }
}

/// Builder for [`FlowFileRecord`], used by the host engine and by swap file
/// decoding.
#[derive(Debug, Clone)]
pub struct FlowFileRecordBuilder {
    record: FlowFileRecord,
}

impl FlowFileRecordBuilder {
    pub fn new(id: FlowFileId) -> Self {
        let now = now_millis();
        Self {
            record: FlowFileRecord {
                id,
                entry_date_ms: now,
                lineage_start_ms: now,
                penalty_expiration_ms: 0,
                size: 0,
                content_claim: None,
                content_claim_offset: 0,
                attributes: HashMap::new(),
            },
        }
    }

    pub fn entry_date_ms(mut self, entry_date_ms: i64) -> Self {
        self.record.entry_date_ms = entry_date_ms;
        self
    }

    pub fn lineage_start_ms(mut self, lineage_start_ms: i64) -> Self {
        self.record.lineage_start_ms = lineage_start_ms;
        self
    }

    pub fn penalty_expiration_ms(mut self, penalty_expiration_ms: i64) -> Self {
        self.record.penalty_expiration_ms = penalty_expiration_ms;
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.record.size = size;
        self
    }

    pub fn content_claim(mut self, claim: ContentClaim, claim_offset: u64) -> Self {
        self.record.content_claim = Some(claim);
        self.record.content_claim_offset = claim_offset;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.record.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.record.attributes = attributes;
        self
    }

    pub fn build(self) -> FlowFileRecord {
        self.record
    }
}
