//! Continuation snapshots
//!
//! A snapshot is a suspended VM wrapped in a versioned envelope. The VM is
//! stored as JSON text together with its SHA-256 checksum so that a damaged
//! or truncated snapshot is rejected instead of resumed.

use crate::engine::{Control, PendingCall, VM};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is empty")]
    Empty,
    #[error("unsupported snapshot version {0} (expected {SNAPSHOT_VERSION})")]
    UnsupportedVersion(u32),
    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,
    #[error("snapshot is not suspended at an external call")]
    NotSuspended,
    #[error("invalid snapshot encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    checksum: String,
    vm: String,
}

/// A VM suspended at an external call
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    vm: VM,
    pending: PendingCall,
}

impl Snapshot {
    pub(crate) fn new(vm: VM) -> Result<Self, SnapshotError> {
        let Control::Suspend(pending) = &vm.control else {
            return Err(SnapshotError::NotSuspended);
        };
        let pending = pending.clone();
        Ok(Self { vm, pending })
    }

    pub(crate) fn into_vm(self) -> VM {
        self.vm
    }

    /// The call the VM is waiting on
    pub fn pending_call(&self) -> &PendingCall {
        &self.pending
    }

    pub(crate) fn tool_call_count_increment(&mut self) {
        self.vm.tool_calls += 1;
    }

    pub fn dump(&self) -> Result<Vec<u8>, SnapshotError> {
        let vm = serde_json::to_string(&self.vm)?;
        let envelope = Envelope {
            version: SNAPSHOT_VERSION,
            checksum: checksum(&vm),
            vm,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    pub fn load(bytes: &[u8]) -> Result<Self, SnapshotError> {
        if bytes.is_empty() {
            return Err(SnapshotError::Empty);
        }
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(envelope.version));
        }
        if checksum(&envelope.vm) != envelope.checksum {
            return Err(SnapshotError::ChecksumMismatch);
        }
        let vm: VM = serde_json::from_str(&envelope.vm)?;
        Self::new(vm)
    }

    /// Dump as base64 text, the form stored in history records
    pub fn encode(&self) -> Result<String, SnapshotError> {
        Ok(BASE64.encode(self.dump()?))
    }

    pub fn decode(text: &str) -> Result<Self, SnapshotError> {
        let bytes = BASE64.decode(text.trim())?;
        Self::load(&bytes)
    }
}

fn checksum(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
