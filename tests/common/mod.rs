#![allow(dead_code)]

use std::collections::BTreeMap;
use targetsh::backend::{Backend, MemoryBackend};
use targetsh::snapshot::{
    BackstorePlugin, FabricModuleConfig, LunConfig, MappedLunConfig, NodeAclConfig, PortalConfig,
    Snapshot, StorageObjectConfig, TargetConfig, TpgConfig,
};

pub const TARGET_WWN: &str = "iqn.2003-01.org.example:storage";
pub const INITIATOR_A: &str = "iqn.1994-05.com.example:alpha";
pub const INITIATOR_B: &str = "iqn.1994-05.com.example:beta";

fn storage_object(plugin: BackstorePlugin, name: &str, dev: Option<&str>) -> StorageObjectConfig {
    StorageObjectConfig {
        plugin,
        name: name.to_string(),
        dev: dev.map(str::to_string),
        size: Some(64 * 1024 * 1024),
        wwn: None,
        write_back: false,
        readonly: false,
        attributes: BTreeMap::new(),
    }
}

/// A small but complete configuration: two backstores, one iSCSI target with
/// one TPG, two LUNs, two ACLs and a portal.
pub fn sample_snapshot() -> Snapshot {
    Snapshot {
        fabric_modules: vec![FabricModuleConfig {
            name: "iscsi".into(),
            attributes: BTreeMap::from([("discovery_auth/enable".into(), "0".into())]),
        }],
        storage_objects: vec![
            storage_object(BackstorePlugin::Iblock, "disk0", Some("/dev/vdb")),
            storage_object(BackstorePlugin::Fileio, "file0", Some("/srv/file0.img")),
        ],
        targets: vec![TargetConfig {
            fabric: "iscsi".into(),
            wwn: TARGET_WWN.into(),
            tpgs: vec![TpgConfig {
                tag: 1,
                enable: true,
                attributes: BTreeMap::from([("authentication".into(), "0".into())]),
                parameters: BTreeMap::from([("AuthMethod".into(), "CHAP,None".into())]),
                luns: vec![
                    LunConfig {
                        index: 0,
                        storage_object: "/backstores/iblock/disk0".into(),
                    },
                    LunConfig {
                        index: 1,
                        storage_object: "/backstores/fileio/file0".into(),
                    },
                ],
                node_acls: vec![
                    NodeAclConfig {
                        node_wwn: INITIATOR_A.into(),
                        attributes: BTreeMap::from([("authentication".into(), "1".into())]),
                        mapped_luns: vec![
                            MappedLunConfig {
                                index: 0,
                                tpg_lun: 0,
                                write_protect: false,
                            },
                            MappedLunConfig {
                                index: 1,
                                tpg_lun: 1,
                                write_protect: true,
                            },
                        ],
                    },
                    NodeAclConfig {
                        node_wwn: INITIATOR_B.into(),
                        attributes: BTreeMap::new(),
                        mapped_luns: vec![MappedLunConfig {
                            index: 0,
                            tpg_lun: 1,
                            write_protect: false,
                        }],
                    },
                ],
                portals: vec![PortalConfig {
                    ip_address: "0.0.0.0".into(),
                    port: 3260,
                }],
            }],
        }],
        ..Default::default()
    }
}

/// Backend holding [`sample_snapshot`].
pub fn configured_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    let errors = backend
        .restore(&sample_snapshot(), false)
        .expect("sample snapshot applies");
    assert_eq!(errors, 0);
    backend
}

/// Backend holding [`sample_snapshot`] with sessions 1 (alpha), 2 (beta)
/// and 3 (alpha again).
pub fn backend_with_sessions() -> MemoryBackend {
    let backend = configured_backend();
    backend
        .login(TARGET_WWN, 1, INITIATOR_A, "alpha", "192.168.1.10")
        .unwrap();
    backend
        .login(TARGET_WWN, 1, INITIATOR_B, "beta", "192.168.1.11")
        .unwrap();
    let third = backend
        .login(TARGET_WWN, 1, INITIATOR_A, "alpha-2", "192.168.1.12")
        .unwrap();
    backend.add_connection(third, "192.168.2.12").unwrap();
    backend
}
