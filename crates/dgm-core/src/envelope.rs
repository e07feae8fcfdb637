//! The event envelope exchanged over the bus.

use crate::correlation::CorrelationId;
use crate::error::{Error, Result};
use crate::events::{CONSTITUTIONAL_HASH, EventPriority, EventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured wrapper around an opaque event payload.
///
/// Created once per message by the publisher; immutable after creation. The
/// bus never interprets `data` or `constitutional_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source_service: String,
    pub priority: EventPriority,
    pub correlation_id: Option<CorrelationId>,
    pub constitutional_hash: String,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Build a root envelope with the type's default priority.
    pub fn new(
        event_type: EventType,
        source_service: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: Utc::now(),
            source_service: source_service.into(),
            priority: event_type.default_priority(),
            correlation_id: None,
            constitutional_hash: CONSTITUTIONAL_HASH.to_string(),
            data,
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Build a downstream envelope causally produced by `self`.
    ///
    /// Copies the correlation id verbatim when present, otherwise starts a
    /// new chain rooted at `self`.
    pub fn correlate(
        &self,
        event_type: EventType,
        source_service: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        let correlation_id = self
            .correlation_id
            .clone()
            .unwrap_or_else(|| CorrelationId::from_string(self.event_id.to_string()));
        Self::new(event_type, source_service, data).with_correlation_id(correlation_id)
    }

    /// Subject this envelope is published to.
    pub fn subject(&self) -> String {
        self.event_type.subject()
    }

    /// Check the invariants every envelope must satisfy before it crosses
    /// the wire: resolvable type, non-empty source and compliance tag.
    pub fn validate(&self) -> Result<()> {
        if self.source_service.is_empty() {
            return Err(Error::InvalidEnvelope("empty source_service".to_string()));
        }
        if self.constitutional_hash.is_empty() {
            return Err(Error::InvalidEnvelope(
                "missing constitutional_hash".to_string(),
            ));
        }
        if let Some(id) = &self.correlation_id {
            if id.as_str().is_empty() {
                return Err(Error::InvalidEnvelope("empty correlation_id".to_string()));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(Error::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: EventEnvelope = serde_json::from_slice(bytes)?;
        envelope.validate()?;
        Ok(envelope)
    }
}
