//! Backend handle: the live target configuration the shell operates on.
//!
//! The shell never reaches the backend through a global; every component
//! takes a `&dyn Backend` (or a generic `B: Backend`) so it can run against
//! the in-memory implementation in tests.

mod memory;

pub use memory::MemoryBackend;

use thiserror::Error;

use crate::snapshot::Snapshot;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("storage objects or targets present, not restoring")]
    ExistingConfig,

    #[error("as a precaution, confirm=true needs to be set")]
    NotConfirmed,

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("backend error: {0}")]
    Other(String),
}

/// A loaded fabric module and the WWNs of its targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FabricModule {
    pub name: String,
    pub targets: Vec<String>,
}

/// Identity of the node ACL a session logged in through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclIdentity {
    pub node_wwn: String,
    pub authenticated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedLun {
    pub mapped_lun: u32,
    /// Device path of the storage object behind the LUN.
    pub udev_path: String,
    pub write_protect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub address: String,
    pub transport: String,
    pub cid: u32,
    pub state: String,
}

/// An open initiator session. Owned by the backend; the shell only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: i64,
    pub alias: String,
    pub session_type: String,
    pub state: String,
    pub acl: AclIdentity,
    pub mapped_luns: Vec<MappedLun>,
    pub connections: Vec<Connection>,
}

/// Access to the live configuration.
///
/// Implementations use interior mutability: the shell holds a shared
/// reference and issues one command at a time.
pub trait Backend {
    /// Loaded fabric modules, in backend order.
    fn fabric_modules(&self) -> Vec<FabricModule>;

    /// Currently open sessions, in backend order.
    fn sessions(&self) -> Vec<Session>;

    /// Snapshot of the whole configuration.
    fn dump(&self) -> Snapshot;

    /// Apply `snapshot`, clearing the current configuration first when
    /// `clear_existing` is set. Returns the number of items that could not
    /// be applied; a hard failure leaves the configuration as it was.
    fn restore(&self, snapshot: &Snapshot, clear_existing: bool) -> Result<usize, BackendError>;

    /// Destroy all configuration. The backend decides what an unconfirmed
    /// request does.
    fn clear_existing(&self, confirm: bool) -> Result<(), BackendError>;
}

impl<B: Backend + ?Sized> Backend for &B {
    fn fabric_modules(&self) -> Vec<FabricModule> {
        (**self).fabric_modules()
    }

    fn sessions(&self) -> Vec<Session> {
        (**self).sessions()
    }

    fn dump(&self) -> Snapshot {
        (**self).dump()
    }

    fn restore(&self, snapshot: &Snapshot, clear_existing: bool) -> Result<usize, BackendError> {
        (**self).restore(snapshot, clear_existing)
    }

    fn clear_existing(&self, confirm: bool) -> Result<(), BackendError> {
        (**self).clear_existing(confirm)
    }
}
