//! Typed configuration snapshot.
//!
//! A [`Snapshot`] describes the entire target configuration: loaded fabric
//! module settings, backstore storage objects, and targets with their TPGs,
//! LUNs, node ACLs and portals. It is what `saveconfig` writes and what
//! `restoreconfig` reads back.
//!
//! On disk a snapshot is JSON with every object's keys sorted, two-space
//! indentation and a single trailing newline, so two saves of the same state
//! are byte-identical.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Newest snapshot schema version this build can read and write.
pub const SNAPSHOT_VERSION: u32 = 1;

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported snapshot version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// The whole backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fabric_modules: Vec<FabricModuleConfig>,
    #[serde(default)]
    pub storage_objects: Vec<StorageObjectConfig>,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            fabric_modules: Vec::new(),
            storage_objects: Vec::new(),
            targets: Vec::new(),
        }
    }
}

/// Per-fabric-module settings, e.g. iSCSI discovery authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FabricModuleConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

/// Backstore plugin a storage object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackstorePlugin {
    Pscsi,
    RdMcp,
    Fileio,
    Iblock,
}

impl BackstorePlugin {
    /// Every plugin, in the order the backstores collection lists them.
    pub const ALL: [BackstorePlugin; 4] = [
        BackstorePlugin::Pscsi,
        BackstorePlugin::RdMcp,
        BackstorePlugin::Fileio,
        BackstorePlugin::Iblock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackstorePlugin::Pscsi => "pscsi",
            BackstorePlugin::RdMcp => "rd_mcp",
            BackstorePlugin::Fileio => "fileio",
            BackstorePlugin::Iblock => "iblock",
        }
    }
}

impl fmt::Display for BackstorePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storage object exported by one of the backstores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageObjectConfig {
    pub plugin: BackstorePlugin,
    pub name: String,
    /// Backing device or file. Absent for ramdisks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    /// Size in bytes. Absent for pass-through devices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wwn: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write_back: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub readonly: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl StorageObjectConfig {
    /// Configuration-tree path used by LUNs to reference this object.
    pub fn path(&self) -> String {
        format!("/backstores/{}/{}", self.plugin, self.name)
    }

    /// Device path exposed to initiators. Ramdisks have no backing device
    /// and report their tree path instead.
    pub fn udev_path(&self) -> String {
        self.dev.clone().unwrap_or_else(|| self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub fabric: String,
    pub wwn: String,
    #[serde(default)]
    pub tpgs: Vec<TpgConfig>,
}

/// Target portal group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TpgConfig {
    pub tag: u16,
    #[serde(default)]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub luns: Vec<LunConfig>,
    #[serde(default)]
    pub node_acls: Vec<NodeAclConfig>,
    #[serde(default)]
    pub portals: Vec<PortalConfig>,
}

impl TpgConfig {
    /// Whether the TPG requires initiators to authenticate.
    pub fn authentication(&self) -> bool {
        attribute_flag(&self.attributes, "authentication")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LunConfig {
    pub index: u32,
    /// `/backstores/<plugin>/<name>` path of the backing storage object.
    pub storage_object: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeAclConfig {
    pub node_wwn: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub mapped_luns: Vec<MappedLunConfig>,
}

impl NodeAclConfig {
    pub fn authentication(&self) -> bool {
        attribute_flag(&self.attributes, "authentication")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappedLunConfig {
    pub index: u32,
    pub tpg_lun: u32,
    #[serde(default)]
    pub write_protect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortalConfig {
    pub ip_address: String,
    pub port: u16,
}

/// Attribute values are kernel-style strings; "1" (or "true") means set.
fn attribute_flag(attributes: &BTreeMap<String, String>, key: &str) -> bool {
    matches!(attributes.get(key).map(String::as_str), Some("1") | Some("true"))
}

impl Snapshot {
    /// True when the snapshot holds no storage objects and no targets.
    pub fn is_empty(&self) -> bool {
        self.storage_objects.is_empty() && self.targets.is_empty()
    }

    /// Parse a snapshot document, rejecting unknown fields and versions
    /// newer than [`SNAPSHOT_VERSION`].
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        let snapshot: Snapshot = serde_json::from_str(text)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: snapshot.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }

    /// Render the canonical on-disk form: sorted keys, two-space indent,
    /// trailing newline.
    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        let value = sort_keys(serde_json::to_value(self)?);
        let mut text = serde_json::to_string_pretty(&value)?;
        text.push('\n');
        Ok(text)
    }
}

/// Rebuild every object with its entries in key order, independent of
/// which map implementation serde_json was compiled with.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, sort_keys(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
