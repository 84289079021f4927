//! Tamper-evident audit log: every entry's hash covers its own fields plus
//! the previous entry's hash, forming a chain that breaks under mutation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::EnrollmentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Access,
    Enroll,
    Waitlist,
    Drop,
    Promote,
    Complete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Access => "access",
            AuditAction::Enroll => "enroll",
            AuditAction::Waitlist => "waitlist",
            AuditAction::Drop => "drop",
            AuditAction::Promote => "promote",
            AuditAction::Complete => "complete",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "access" => Ok(AuditAction::Access),
            "enroll" => Ok(AuditAction::Enroll),
            "waitlist" => Ok(AuditAction::Waitlist),
            "drop" => Ok(AuditAction::Drop),
            "promote" => Ok(AuditAction::Promote),
            "complete" => Ok(AuditAction::Complete),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// The caller-supplied half of an audit entry, before chaining.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub metadata: Map<String, Value>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, resource_type: &str) -> Self {
        Self {
            action,
            resource_type: resource_type.to_string(),
            resource_id: None,
            actor_id: None,
            metadata: Map::new(),
        }
    }

    pub fn resource(mut self, resource_id: Uuid) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// One immutable audit entry. `entry_hash` covers every other field,
/// `previous_hash` included; the first entry in a chain uses an empty
/// `previous_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
    pub previous_hash: String,
    pub entry_hash: String,
}

impl AuditEntry {
    /// Build and hash a new entry chained onto `previous_hash`.
    pub fn create(record: AuditRecord, previous_hash: &str) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4(),
            action: record.action,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            actor_id: record.actor_id,
            timestamp: Utc::now(),
            metadata: record.metadata,
            previous_hash: previous_hash.to_string(),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }

    /// SHA-256 over the canonical serialization: fixed field order, RFC 3339
    /// timestamps at microsecond precision, metadata as JSON with sorted
    /// keys. Equal field values always produce equal hashes.
    pub fn compute_hash(&self) -> String {
        let canonical = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.action,
            self.resource_type,
            self.resource_id.map(|id| id.to_string()).unwrap_or_default(),
            self.actor_id.map(|id| id.to_string()).unwrap_or_default(),
            Value::Object(self.metadata.clone()),
            self.previous_hash,
        );
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }

    /// Does the stored hash match the entry's fields?
    pub fn verify_hash(&self) -> bool {
        self.entry_hash == self.compute_hash()
    }

    /// Is this entry intact and correctly linked to `prev`?
    pub fn verify_chain(&self, prev: &AuditEntry) -> bool {
        self.previous_hash == prev.entry_hash && self.verify_hash()
    }
}

/// Verify a full chain in order: every entry intact, every link correct.
/// Returns the index of the first bad entry, or `Ok(())`.
pub fn verify_entries(entries: &[AuditEntry]) -> Result<(), usize> {
    for (i, entry) in entries.iter().enumerate() {
        if !entry.verify_hash() {
            return Err(i);
        }
        match i {
            0 => {
                if !entry.previous_hash.is_empty() {
                    return Err(0);
                }
            }
            _ => {
                if entry.previous_hash != entries[i - 1].entry_hash {
                    return Err(i);
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("Audit chain is broken at the tail")]
    BrokenChain,
}

impl From<AuditError> for EnrollmentError {
    fn from(err: AuditError) -> Self {
        EnrollmentError::AuditFailure(err.to_string())
    }
}

/// Append-only audit persistence.
///
/// Implementations chain the record onto the current tail and serialize
/// concurrent appends on it; the returned entry is already hashed.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<AuditEntry, AuditError>;

    async fn tail(&self) -> Result<Option<AuditEntry>, AuditError>;

    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError>;
}

/// Process-local audit chain for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<AuditEntry, AuditError> {
        // Tail is read and extended under one lock: writers serialize here.
        let mut entries = self.entries.lock().await;
        let previous_hash = entries
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_default();
        let entry = AuditEntry::create(record, &previous_hash);
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn tail(&self) -> Result<Option<AuditEntry>, AuditError> {
        Ok(self.entries.lock().await.last().cloned())
    }

    async fn entries(&self) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self.entries.lock().await.clone())
    }
}
