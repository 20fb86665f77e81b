use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{AclIdentity, Backend, BackendError, Connection, FabricModule, MappedLun, Session};
use crate::snapshot::{
    FabricModuleConfig, NodeAclConfig, Snapshot, StorageObjectConfig, TargetConfig, TpgConfig,
    SNAPSHOT_VERSION,
};

/// Fabric modules a fresh in-memory backend reports as loaded.
const DEFAULT_FABRIC_MODULES: [&str; 7] = [
    "iscsi",
    "loopback",
    "tcm_fc",
    "srpt",
    "qla2xxx",
    "vhost",
    "usb_gadget",
];

/// A login recorded against a node ACL. Resolved against the current
/// configuration every time sessions are listed, so a session disappears
/// as soon as its ACL does.
#[derive(Debug, Clone)]
struct SessionRecord {
    id: i64,
    alias: String,
    fabric: String,
    target_wwn: String,
    tag: u16,
    node_wwn: String,
    connections: Vec<Connection>,
}

struct BackendInner {
    fabric_modules: Vec<String>,
    fabric_attributes: BTreeMap<String, BTreeMap<String, String>>,
    storage_objects: Vec<StorageObjectConfig>,
    targets: Vec<TargetConfig>,
    sessions: Vec<SessionRecord>,
    next_session_id: i64,
}

impl BackendInner {
    fn has_config(&self) -> bool {
        !self.storage_objects.is_empty() || !self.targets.is_empty()
    }

    fn clear(&mut self) {
        self.sessions.clear();
        self.targets.clear();
        self.storage_objects.clear();
    }

    fn is_loaded(&self, fabric: &str) -> bool {
        self.fabric_modules.iter().any(|m| m == fabric)
    }

    fn storage_object(&self, path: &str) -> Option<&StorageObjectConfig> {
        self.storage_objects.iter().find(|so| so.path() == path)
    }

    fn find_tpg(&self, fabric: &str, wwn: &str, tag: u16) -> Option<&TpgConfig> {
        self.targets
            .iter()
            .find(|t| t.fabric == fabric && t.wwn == wwn)
            .and_then(|t| t.tpgs.iter().find(|tpg| tpg.tag == tag))
    }

    fn resolve_session(&self, record: &SessionRecord) -> Option<Session> {
        let tpg = self.find_tpg(&record.fabric, &record.target_wwn, record.tag)?;
        let acl = tpg.node_acls.iter().find(|a| a.node_wwn == record.node_wwn)?;

        let mapped_luns = acl
            .mapped_luns
            .iter()
            .filter_map(|mlun| {
                let lun = tpg.luns.iter().find(|l| l.index == mlun.tpg_lun)?;
                let so = self.storage_object(&lun.storage_object)?;
                Some(MappedLun {
                    mapped_lun: mlun.index,
                    udev_path: so.udev_path(),
                    write_protect: mlun.write_protect,
                })
            })
            .collect();

        Some(Session {
            id: record.id,
            alias: record.alias.clone(),
            session_type: "NORMAL".to_string(),
            state: "LOGGED_IN".to_string(),
            acl: AclIdentity {
                node_wwn: acl.node_wwn.clone(),
                authenticated: acl.authentication(),
            },
            mapped_luns,
            connections: record.connections.clone(),
        })
    }

    /// Copy one TPG, keeping only the members that can be applied on top of
    /// the storage objects already restored.
    fn restore_tpg(&self, tpg: &TpgConfig, errors: &mut usize) -> TpgConfig {
        let mut restored = TpgConfig {
            tag: tpg.tag,
            enable: tpg.enable,
            attributes: tpg.attributes.clone(),
            parameters: tpg.parameters.clone(),
            luns: Vec::new(),
            node_acls: Vec::new(),
            portals: Vec::new(),
        };

        for lun in &tpg.luns {
            if self.storage_object(&lun.storage_object).is_none() {
                tracing::warn!(lun = lun.index, so = %lun.storage_object, "LUN references a missing storage object");
                *errors += 1;
            } else if restored.luns.iter().any(|l| l.index == lun.index) {
                tracing::warn!(lun = lun.index, "duplicate LUN");
                *errors += 1;
            } else {
                restored.luns.push(lun.clone());
            }
        }

        for portal in &tpg.portals {
            if restored.portals.contains(portal) {
                tracing::warn!(ip = %portal.ip_address, port = portal.port, "duplicate portal");
                *errors += 1;
            } else {
                restored.portals.push(portal.clone());
            }
        }

        for acl in &tpg.node_acls {
            if restored.node_acls.iter().any(|a| a.node_wwn == acl.node_wwn) {
                tracing::warn!(node_wwn = %acl.node_wwn, "duplicate node ACL");
                *errors += 1;
                continue;
            }
            let mut node_acl = NodeAclConfig {
                node_wwn: acl.node_wwn.clone(),
                attributes: acl.attributes.clone(),
                mapped_luns: Vec::new(),
            };
            for mlun in &acl.mapped_luns {
                let has_lun = restored.luns.iter().any(|l| l.index == mlun.tpg_lun);
                let duplicate = node_acl.mapped_luns.iter().any(|m| m.index == mlun.index);
                if !has_lun || duplicate {
                    tracing::warn!(
                        node_wwn = %acl.node_wwn,
                        mapped_lun = mlun.index,
                        tpg_lun = mlun.tpg_lun,
                        "mapped LUN could not be restored"
                    );
                    *errors += 1;
                } else {
                    node_acl.mapped_luns.push(mlun.clone());
                }
            }
            restored.node_acls.push(node_acl);
        }

        restored
    }
}

/// In-process backend holding the configuration in memory.
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<RwLock<BackendInner>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("MemoryBackend")
            .field("fabric_modules", &inner.fabric_modules)
            .field("storage_objects", &inner.storage_objects.len())
            .field("targets", &inner.targets.len())
            .field("sessions", &inner.sessions.len())
            .finish()
    }
}

impl MemoryBackend {
    /// Empty configuration with the default set of loaded fabric modules.
    pub fn new() -> Self {
        Self::with_fabric_modules(DEFAULT_FABRIC_MODULES)
    }

    /// Empty configuration with exactly the given fabric modules loaded.
    pub fn with_fabric_modules<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(RwLock::new(BackendInner {
                fabric_modules: modules.into_iter().map(Into::into).collect(),
                fabric_attributes: BTreeMap::new(),
                storage_objects: Vec::new(),
                targets: Vec::new(),
                sessions: Vec::new(),
                next_session_id: 1,
            })),
        }
    }

    /// Record an initiator login through an existing node ACL and return the
    /// new session id.
    pub fn login(
        &self,
        target_wwn: &str,
        tag: u16,
        node_wwn: &str,
        alias: &str,
        address: &str,
    ) -> Result<i64, BackendError> {
        let mut inner = self.inner.write();

        let target = inner
            .targets
            .iter()
            .find(|t| t.wwn == target_wwn)
            .ok_or_else(|| BackendError::Other(format!("no target {target_wwn}")))?;
        let fabric = target.fabric.clone();
        let tpg = target
            .tpgs
            .iter()
            .find(|tpg| tpg.tag == tag)
            .ok_or_else(|| BackendError::Other(format!("no tpg{tag} under {target_wwn}")))?;
        if !tpg.node_acls.iter().any(|a| a.node_wwn == node_wwn) {
            return Err(BackendError::Other(format!(
                "no node ACL for {node_wwn} under {target_wwn}/tpg{tag}"
            )));
        }

        let transport = if fabric == "iscsi" { "TCP" } else { fabric.as_str() }.to_string();
        let id = inner.next_session_id;
        inner.next_session_id += 1;
        inner.sessions.push(SessionRecord {
            id,
            alias: alias.to_string(),
            fabric,
            target_wwn: target_wwn.to_string(),
            tag,
            node_wwn: node_wwn.to_string(),
            connections: vec![Connection {
                address: address.to_string(),
                transport,
                cid: 0,
                state: "LOGGED_IN".to_string(),
            }],
        });
        tracing::debug!(sid = id, node_wwn, target_wwn, "session logged in");
        Ok(id)
    }

    /// Add another connection to an open session.
    pub fn add_connection(&self, sid: i64, address: &str) -> Result<u32, BackendError> {
        let mut inner = self.inner.write();
        let record = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == sid)
            .ok_or_else(|| BackendError::Other(format!("no session {sid}")))?;
        let cid = record.connections.iter().map(|c| c.cid + 1).max().unwrap_or(0);
        let transport = record
            .connections
            .first()
            .map(|c| c.transport.clone())
            .unwrap_or_else(|| "TCP".to_string());
        record.connections.push(Connection {
            address: address.to_string(),
            transport,
            cid,
            state: "LOGGED_IN".to_string(),
        });
        Ok(cid)
    }

    /// Drop a session, as if the initiator logged out.
    pub fn logout(&self, sid: i64) -> bool {
        let mut inner = self.inner.write();
        let before = inner.sessions.len();
        inner.sessions.retain(|s| s.id != sid);
        inner.sessions.len() != before
    }
}

impl Backend for MemoryBackend {
    fn fabric_modules(&self) -> Vec<FabricModule> {
        let inner = self.inner.read();
        inner
            .fabric_modules
            .iter()
            .map(|name| FabricModule {
                name: name.clone(),
                targets: inner
                    .targets
                    .iter()
                    .filter(|t| &t.fabric == name)
                    .map(|t| t.wwn.clone())
                    .collect(),
            })
            .collect()
    }

    fn sessions(&self) -> Vec<Session> {
        let inner = self.inner.read();
        inner
            .sessions
            .iter()
            .filter_map(|record| inner.resolve_session(record))
            .collect()
    }

    fn dump(&self) -> Snapshot {
        let inner = self.inner.read();
        let fabric_modules = inner
            .fabric_modules
            .iter()
            .filter_map(|name| {
                let attributes = inner.fabric_attributes.get(name)?;
                if attributes.is_empty() {
                    return None;
                }
                Some(FabricModuleConfig {
                    name: name.clone(),
                    attributes: attributes.clone(),
                })
            })
            .collect();

        Snapshot {
            version: SNAPSHOT_VERSION,
            fabric_modules,
            storage_objects: inner.storage_objects.clone(),
            targets: inner.targets.clone(),
        }
    }

    fn restore(&self, snapshot: &Snapshot, clear_existing: bool) -> Result<usize, BackendError> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(BackendError::UnsupportedVersion(snapshot.version));
        }

        let mut inner = self.inner.write();
        if clear_existing {
            inner.clear();
        } else if inner.has_config() {
            return Err(BackendError::ExistingConfig);
        }

        let mut errors = 0;

        for fm in &snapshot.fabric_modules {
            if !inner.is_loaded(&fm.name) {
                tracing::warn!(fabric = %fm.name, "fabric module not loaded");
                errors += 1;
                continue;
            }
            inner
                .fabric_attributes
                .insert(fm.name.clone(), fm.attributes.clone());
        }

        for so in &snapshot.storage_objects {
            let exists = inner
                .storage_objects
                .iter()
                .any(|o| o.plugin == so.plugin && o.name == so.name);
            if exists {
                tracing::warn!(path = %so.path(), "duplicate storage object");
                errors += 1;
                continue;
            }
            inner.storage_objects.push(so.clone());
        }

        for target in &snapshot.targets {
            if !inner.is_loaded(&target.fabric) {
                tracing::warn!(fabric = %target.fabric, wwn = %target.wwn, "target on unknown fabric module");
                errors += 1;
                continue;
            }
            let exists = inner
                .targets
                .iter()
                .any(|t| t.fabric == target.fabric && t.wwn == target.wwn);
            if exists {
                tracing::warn!(wwn = %target.wwn, "duplicate target");
                errors += 1;
                continue;
            }

            let mut restored = TargetConfig {
                fabric: target.fabric.clone(),
                wwn: target.wwn.clone(),
                tpgs: Vec::new(),
            };
            for tpg in &target.tpgs {
                if restored.tpgs.iter().any(|t| t.tag == tpg.tag) {
                    tracing::warn!(wwn = %target.wwn, tag = tpg.tag, "duplicate TPG");
                    errors += 1;
                    continue;
                }
                let tpg = inner.restore_tpg(tpg, &mut errors);
                restored.tpgs.push(tpg);
            }
            inner.targets.push(restored);
        }

        Ok(errors)
    }

    fn clear_existing(&self, confirm: bool) -> Result<(), BackendError> {
        let mut inner = self.inner.write();
        if !confirm {
            if inner.has_config() {
                return Err(BackendError::NotConfirmed);
            }
            return Ok(());
        }
        inner.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{BackstorePlugin, LunConfig, MappedLunConfig, PortalConfig};

    fn block(name: &str) -> StorageObjectConfig {
        StorageObjectConfig {
            plugin: BackstorePlugin::Iblock,
            name: name.into(),
            dev: Some(format!("/dev/{name}")),
            size: Some(1 << 20),
            wwn: None,
            write_back: false,
            readonly: false,
            attributes: BTreeMap::new(),
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            storage_objects: vec![block("sdb")],
            targets: vec![TargetConfig {
                fabric: "iscsi".into(),
                wwn: "iqn.2003-01.org.example:t1".into(),
                tpgs: vec![TpgConfig {
                    tag: 1,
                    enable: true,
                    attributes: BTreeMap::new(),
                    parameters: BTreeMap::new(),
                    luns: vec![LunConfig {
                        index: 0,
                        storage_object: "/backstores/iblock/sdb".into(),
                    }],
                    node_acls: vec![NodeAclConfig {
                        node_wwn: "iqn.1994-05.com.example:client".into(),
                        attributes: BTreeMap::from([("authentication".into(), "1".into())]),
                        mapped_luns: vec![MappedLunConfig {
                            index: 0,
                            tpg_lun: 0,
                            write_protect: true,
                        }],
                    }],
                    portals: vec![PortalConfig {
                        ip_address: "0.0.0.0".into(),
                        port: 3260,
                    }],
                }],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn restore_then_dump_matches() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.restore(&snapshot(), false).unwrap(), 0);
        assert_eq!(backend.dump(), snapshot());
    }

    #[test]
    fn restore_refuses_existing_config_without_clear() {
        let backend = MemoryBackend::new();
        backend.restore(&snapshot(), false).unwrap();
        assert_eq!(
            backend.restore(&snapshot(), false),
            Err(BackendError::ExistingConfig)
        );
        // clear_existing replaces instead of duplicating
        assert_eq!(backend.restore(&snapshot(), true).unwrap(), 0);
        assert_eq!(backend.dump(), snapshot());
    }

    #[test]
    fn restore_counts_recoverable_errors() {
        let mut snap = snapshot();
        snap.storage_objects.push(block("sdb"));
        snap.targets[0].tpgs[0].luns.push(LunConfig {
            index: 1,
            storage_object: "/backstores/fileio/missing".into(),
        });
        snap.targets[0].tpgs[0].node_acls[0].mapped_luns.push(MappedLunConfig {
            index: 1,
            tpg_lun: 1,
            write_protect: false,
        });
        snap.targets.push(TargetConfig {
            fabric: "nonexistent".into(),
            wwn: "naa.0000".into(),
            tpgs: vec![],
        });

        let backend = MemoryBackend::new();
        assert_eq!(backend.restore(&snap, false).unwrap(), 4);
        assert_eq!(backend.dump(), snapshot());
    }

    #[test]
    fn restore_rejects_newer_version_without_clearing() {
        let backend = MemoryBackend::new();
        backend.restore(&snapshot(), false).unwrap();
        let newer = Snapshot {
            version: SNAPSHOT_VERSION + 1,
            ..Default::default()
        };
        assert!(matches!(
            backend.restore(&newer, true),
            Err(BackendError::UnsupportedVersion(_))
        ));
        assert_eq!(backend.dump(), snapshot());
    }

    #[test]
    fn fabric_attributes_round_trip() {
        let mut snap = snapshot();
        snap.fabric_modules.push(FabricModuleConfig {
            name: "iscsi".into(),
            attributes: BTreeMap::from([("discovery_auth/enable".into(), "1".into())]),
        });
        let backend = MemoryBackend::new();
        assert_eq!(backend.restore(&snap, false).unwrap(), 0);
        assert_eq!(backend.dump(), snap);
    }

    #[test]
    fn clear_requires_confirmation_when_configured() {
        let backend = MemoryBackend::new();
        assert!(backend.clear_existing(false).is_ok());

        backend.restore(&snapshot(), false).unwrap();
        assert_eq!(backend.clear_existing(false), Err(BackendError::NotConfirmed));
        assert!(!backend.dump().is_empty());

        backend.clear_existing(true).unwrap();
        assert!(backend.dump().is_empty());
    }

    #[test]
    fn fabric_modules_list_their_targets() {
        let backend = MemoryBackend::with_fabric_modules(["iscsi", "loopback"]);
        backend.restore(&snapshot(), false).unwrap();
        let modules = backend.fabric_modules();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].targets, vec!["iqn.2003-01.org.example:t1".to_string()]);
        assert!(modules[1].targets.is_empty());
    }

    #[test]
    fn sessions_resolve_acl_and_luns() {
        let backend = MemoryBackend::new();
        backend.restore(&snapshot(), false).unwrap();
        let sid = backend
            .login(
                "iqn.2003-01.org.example:t1",
                1,
                "iqn.1994-05.com.example:client",
                "client",
                "10.0.0.5",
            )
            .unwrap();
        backend.add_connection(sid, "10.0.0.6").unwrap();

        let sessions = backend.sessions();
        assert_eq!(sessions.len(), 1);
        let session = &sessions[0];
        assert_eq!(session.id, sid);
        assert!(session.acl.authenticated);
        assert_eq!(session.mapped_luns[0].udev_path, "/dev/sdb");
        assert!(session.mapped_luns[0].write_protect);
        assert_eq!(session.connections.len(), 2);
        assert_eq!(session.connections[1].cid, 1);
        assert_eq!(session.connections[1].transport, "TCP");
    }

    #[test]
    fn login_requires_acl() {
        let backend = MemoryBackend::new();
        backend.restore(&snapshot(), false).unwrap();
        assert!(backend
            .login("iqn.2003-01.org.example:t1", 1, "iqn.unknown", "x", "10.0.0.1")
            .is_err());
    }

    #[test]
    fn clearing_drops_sessions() {
        let backend = MemoryBackend::new();
        backend.restore(&snapshot(), false).unwrap();
        backend
            .login(
                "iqn.2003-01.org.example:t1",
                1,
                "iqn.1994-05.com.example:client",
                "client",
                "10.0.0.5",
            )
            .unwrap();
        backend.clear_existing(true).unwrap();
        assert!(backend.sessions().is_empty());
    }

    #[test]
    fn logout_removes_session() {
        let backend = MemoryBackend::new();
        backend.restore(&snapshot(), false).unwrap();
        let sid = backend
            .login(
                "iqn.2003-01.org.example:t1",
                1,
                "iqn.1994-05.com.example:client",
                "client",
                "10.0.0.5",
            )
            .unwrap();
        assert!(backend.logout(sid));
        assert!(!backend.logout(sid));
        assert!(backend.sessions().is_empty());
    }
}
