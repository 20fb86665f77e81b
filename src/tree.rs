//! In-memory mirror of the backend configuration.
//!
//! The tree is rebuilt wholesale by [`Tree::refresh`]: every child of the
//! root is dropped and recreated from the backend's current enumeration.
//! Each refresh bumps the tree generation, and a [`NodeRef`] taken under an
//! older generation no longer resolves.

use crate::backend::Backend;
use crate::snapshot::{
    BackstorePlugin, LunConfig, MappedLunConfig, NodeAclConfig, PortalConfig, Snapshot,
    StorageObjectConfig, TargetConfig, TpgConfig,
};

/// Width of a rendered `ls` line before the summary.
const LS_WIDTH: usize = 72;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub summary: String,
    pub children: Vec<Node>,
}

impl Node {
    fn new(name: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: summary.into(),
            children: Vec::new(),
        }
    }

    fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }
}

/// Handle to a node that is only valid for the generation it was taken in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    path: String,
    generation: u64,
}

impl NodeRef {
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    root: Node,
    generation: u64,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree with an empty root. Call [`Tree::refresh`] to populate it.
    pub fn new() -> Self {
        Self {
            root: Node::new("/", ""),
            generation: 0,
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Discard every child of the root and rebuild from `backend`: one
    /// `backstores` collection, then one node per fabric module.
    pub fn refresh<B: Backend + ?Sized>(&mut self, backend: &B) {
        let snapshot = backend.dump();

        let mut children = Vec::with_capacity(1 + snapshot.targets.len());
        children.push(backstores_node(&snapshot));
        for module in backend.fabric_modules() {
            let targets: Vec<Node> = module
                .targets
                .iter()
                .filter_map(|wwn| {
                    snapshot
                        .targets
                        .iter()
                        .find(|t| t.fabric == module.name && &t.wwn == wwn)
                })
                .map(|target| target_node(&snapshot, target))
                .collect();
            let summary = plural(targets.len(), "Target");
            children.push(
                Node::new(module.name.clone(), summary).with_children(targets),
            );
        }

        self.root = Node::new("/", root_summary(&snapshot)).with_children(children);
        self.generation += 1;
        tracing::debug!(generation = self.generation, "configuration tree refreshed");
    }

    /// Look up a node by absolute path, e.g. `/backstores/iblock/disk0`.
    pub fn find(&self, path: &str) -> Option<&Node> {
        let mut node = &self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            node = node.child(part)?;
        }
        Some(node)
    }

    /// Take a reference to the node at `path` in the current generation.
    pub fn node_ref(&self, path: &str) -> Option<NodeRef> {
        self.find(path).map(|_| NodeRef {
            path: path.to_string(),
            generation: self.generation,
        })
    }

    /// Resolve a reference. Fails once the tree has been refreshed since the
    /// reference was taken.
    pub fn resolve(&self, node_ref: &NodeRef) -> Option<&Node> {
        if node_ref.generation != self.generation {
            return None;
        }
        self.find(&node_ref.path)
    }

    /// Render the tree below `path` as `ls` output, down to `depth` levels
    /// (unlimited when `None`).
    pub fn render(&self, path: &str, depth: Option<usize>) -> Option<Vec<String>> {
        let node = self.find(path)?;
        let mut lines = Vec::new();
        render_node(node, "", "", depth, &mut lines);
        Some(lines)
    }
}

fn render_node(node: &Node, lead: &str, child_lead: &str, depth: Option<usize>, out: &mut Vec<String>) {
    let head = format!("{lead}o- {} ", node.name);
    let fill = LS_WIDTH.saturating_sub(head.chars().count()).max(3);
    let summary = if node.summary.is_empty() { "..." } else { &node.summary };
    out.push(format!("{head}{} [{summary}]", ".".repeat(fill)));

    if depth == Some(0) {
        return;
    }
    let next = depth.map(|d| d - 1);
    let count = node.children.len();
    for (i, child) in node.children.iter().enumerate() {
        let last = i + 1 == count;
        let lead = format!("{child_lead}  ");
        let below = if last {
            format!("{child_lead}    ")
        } else {
            format!("{child_lead}  | ")
        };
        render_node(child, &lead, &below, next, out);
    }
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

fn root_summary(snapshot: &Snapshot) -> String {
    format!(
        "Storage Objects: {}, Targets: {}",
        snapshot.storage_objects.len(),
        snapshot.targets.len()
    )
}

/// Human-readable size in binary units, e.g. `1.0MiB`.
pub fn bytes_to_human(size: u64) -> String {
    const UNITS: [&str; 6] = ["bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = size as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if value < 1024.0 {
            return format!("{value:.1}{unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1}{}", UNITS[UNITS.len() - 1])
}

fn is_activated(snapshot: &Snapshot, so: &StorageObjectConfig) -> bool {
    let path = so.path();
    snapshot
        .targets
        .iter()
        .flat_map(|t| &t.tpgs)
        .flat_map(|tpg| &tpg.luns)
        .any(|lun| lun.storage_object == path)
}

fn storage_object_summary(snapshot: &Snapshot, so: &StorageObjectConfig) -> String {
    let status = if is_activated(snapshot, so) { "activated" } else { "deactivated" };
    let size = bytes_to_human(so.size.unwrap_or(0));
    let cache = if so.write_back { "write-back" } else { "write-thru" };
    match so.plugin {
        BackstorePlugin::Pscsi => format!("{} {status}", so.udev_path()),
        BackstorePlugin::RdMcp => format!("({size}) {status}"),
        BackstorePlugin::Fileio => format!("{} ({size}) {cache} {status}", so.udev_path()),
        BackstorePlugin::Iblock => {
            let ro = if so.readonly { "ro " } else { "" };
            format!("{} ({size}) {ro}{cache} {status}", so.udev_path())
        }
    }
}

fn backstores_node(snapshot: &Snapshot) -> Node {
    let plugins = BackstorePlugin::ALL
        .iter()
        .map(|&plugin| {
            let objects: Vec<Node> = snapshot
                .storage_objects
                .iter()
                .filter(|so| so.plugin == plugin)
                .map(|so| {
                    Node::new(so.name.clone(), storage_object_summary(snapshot, so))
                })
                .collect();
            let summary = format!("Storage Objects: {}", objects.len());
            Node::new(plugin.as_str(), summary).with_children(objects)
        })
        .collect();
    Node::new("backstores", "").with_children(plugins)
}

fn target_node(snapshot: &Snapshot, target: &TargetConfig) -> Node {
    let tpgs: Vec<Node> = target.tpgs.iter().map(|tpg| tpg_node(snapshot, tpg)).collect();
    let summary = plural(tpgs.len(), "TPG");
    Node::new(target.wwn.clone(), summary).with_children(tpgs)
}

fn tpg_node(snapshot: &Snapshot, tpg: &TpgConfig) -> Node {
    let mut summary = if tpg.enable { "enabled" } else { "disabled" }.to_string();
    if tpg.authentication() {
        summary.push_str(", auth");
    }

    let luns: Vec<Node> = tpg.luns.iter().map(|lun| lun_node(snapshot, lun)).collect();
    let acls: Vec<Node> = tpg
        .node_acls
        .iter()
        .map(|acl| acl_node(snapshot, tpg, acl))
        .collect();
    let portals: Vec<Node> = tpg.portals.iter().map(portal_node).collect();

    Node::new(format!("tpg{}", tpg.tag), summary).with_children(vec![
        Node::new("luns", plural(luns.len(), "LUN")).with_children(luns),
        Node::new("acls", plural(acls.len(), "ACL")).with_children(acls),
        Node::new("portals", plural(portals.len(), "Portal")).with_children(portals),
    ])
}

fn find_storage_object<'a>(snapshot: &'a Snapshot, path: &str) -> Option<&'a StorageObjectConfig> {
    snapshot.storage_objects.iter().find(|so| so.path() == path)
}

fn lun_node(snapshot: &Snapshot, lun: &LunConfig) -> Node {
    let summary = match find_storage_object(snapshot, &lun.storage_object) {
        None => "BROKEN STORAGE LINK".to_string(),
        Some(so) if so.plugin == BackstorePlugin::RdMcp => format!("{}/{}", so.plugin, so.name),
        Some(so) => format!("{}/{} ({})", so.plugin, so.name, so.udev_path()),
    };
    Node::new(format!("lun{}", lun.index), summary)
}

fn acl_node(snapshot: &Snapshot, tpg: &TpgConfig, acl: &NodeAclConfig) -> Node {
    let mapped: Vec<Node> = acl
        .mapped_luns
        .iter()
        .map(|mlun| mapped_lun_node(snapshot, tpg, mlun))
        .collect();
    let mut summary = plural(mapped.len(), "Mapped LUN");
    if tpg.authentication() {
        summary.push_str(", auth");
    }
    Node::new(acl.node_wwn.clone(), summary).with_children(mapped)
}

fn mapped_lun_node(snapshot: &Snapshot, tpg: &TpgConfig, mlun: &MappedLunConfig) -> Node {
    let target = tpg
        .luns
        .iter()
        .find(|lun| lun.index == mlun.tpg_lun)
        .and_then(|lun| find_storage_object(snapshot, &lun.storage_object));
    let summary = match target {
        None => "BROKEN LUN LINK".to_string(),
        Some(so) => {
            let mode = if mlun.write_protect { "ro" } else { "rw" };
            format!("lun{} {}/{} ({mode})", mlun.tpg_lun, so.plugin, so.name)
        }
    };
    Node::new(format!("mapped_lun{}", mlun.index), summary)
}

fn portal_node(portal: &PortalConfig) -> Node {
    Node::new(format!("{}:{}", portal.ip_address, portal.port), "")
}
