//! In-memory hierarchical store of versioned nodes.
//!
//! Every mutating call is atomic: all preconditions are checked before the
//! first field is touched, so a failed call leaves the tree exactly as it was.
//! Mutations return the [`WatchTrigger`]s the caller must hand to the watch
//! manager inside the same exclusive section.

use std::collections::BTreeSet;
use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use tracing::trace;

use super::path::node_name;
use super::path::parent_path;
use super::path::ROOT_PATH;
use super::DataNode;
use super::Stat;
use crate::constants::SEQUENTIAL_SUFFIX_WIDTH;
use crate::EventType;
use crate::KeeperError;
use crate::SessionId;
use crate::WatchTrigger;
use crate::Zxid;

type TreeResult<T> = std::result::Result<T, KeeperError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTree {
    /// Arena of nodes keyed by absolute path
    nodes: HashMap<String, DataNode>,

    /// Session id -> ephemeral paths it owns; rebuilt from `nodes` on load
    #[serde(skip)]
    ephemerals: HashMap<SessionId, BTreeSet<String>>,
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_PATH.to_string(), DataNode::new(Vec::new(), 0, 0, 0));
        Self {
            nodes,
            ephemerals: HashMap::new(),
        }
    }

    /// Rebuilds the session -> ephemeral index after deserialization
    pub(crate) fn rebuild_ephemerals(&mut self) {
        self.ephemerals.clear();
        for (path, node) in &self.nodes {
            if node.is_ephemeral() {
                self.ephemerals.entry(node.ephemeral_owner).or_default().insert(path.clone());
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn ephemeral_count(&self) -> usize {
        self.ephemerals.values().map(|paths| paths.len()).sum()
    }

    /// Ephemeral paths owned by `session_id`, sorted
    pub fn ephemerals(
        &self,
        session_id: SessionId,
    ) -> Vec<String> {
        self.ephemerals
            .get(&session_id)
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn node(
        &self,
        path: &str,
    ) -> Option<&DataNode> {
        self.nodes.get(path)
    }

    pub fn stat_node(
        &self,
        path: &str,
    ) -> Option<Stat> {
        self.nodes.get(path).map(DataNode::stat)
    }

    pub fn get_data(
        &self,
        path: &str,
    ) -> TreeResult<(Vec<u8>, Stat)> {
        let node = self.nodes.get(path).ok_or(KeeperError::NoNode)?;
        Ok((node.data.clone(), node.stat()))
    }

    pub fn get_children(
        &self,
        path: &str,
    ) -> TreeResult<(Vec<String>, Stat)> {
        let node = self.nodes.get(path).ok_or(KeeperError::NoNode)?;
        Ok((node.children.iter().cloned().collect(), node.stat()))
    }

    /// Final path of a sequential create: the parent's child version,
    /// zero padded, appended to the requested path.
    pub fn sequential_path(
        &self,
        path: &str,
    ) -> TreeResult<String> {
        let parent = parent_path(path).ok_or(KeeperError::BadArguments)?;
        let parent_node = self.nodes.get(parent).ok_or(KeeperError::NoNode)?;
        Ok(format!(
            "{path}{:0width$}",
            parent_node.cversion,
            width = SEQUENTIAL_SUFFIX_WIDTH
        ))
    }

    pub fn check_create(
        &self,
        path: &str,
    ) -> TreeResult<()> {
        let parent = parent_path(path).ok_or(KeeperError::NodeExists)?;
        let parent_node = self.nodes.get(parent).ok_or(KeeperError::NoNode)?;
        if parent_node.is_ephemeral() {
            return Err(KeeperError::NoChildrenForEphemeral);
        }
        if self.nodes.contains_key(path) {
            return Err(KeeperError::NodeExists);
        }
        Ok(())
    }

    pub fn check_delete(
        &self,
        path: &str,
        expected_version: i32,
    ) -> TreeResult<()> {
        if path == ROOT_PATH {
            return Err(KeeperError::BadArguments);
        }
        let node = self.nodes.get(path).ok_or(KeeperError::NoNode)?;
        check_version(node, expected_version)?;
        if !node.children.is_empty() {
            return Err(KeeperError::NotEmpty);
        }
        Ok(())
    }

    pub fn check_set_data(
        &self,
        path: &str,
        expected_version: i32,
    ) -> TreeResult<()> {
        let node = self.nodes.get(path).ok_or(KeeperError::NoNode)?;
        check_version(node, expected_version)
    }

    /// Creates `path` (already final, sequential suffix included).
    ///
    /// Fires NodeCreated on the path and NodeChildrenChanged on the parent.
    pub fn create_node(
        &mut self,
        path: &str,
        data: Vec<u8>,
        ephemeral_owner: SessionId,
        zxid: Zxid,
        time: u64,
    ) -> TreeResult<(Stat, Vec<WatchTrigger>)> {
        self.check_create(path)?;
        let parent = parent_path(path).ok_or(KeeperError::NodeExists)?.to_string();

        let parent_node = self.nodes.get_mut(&parent).ok_or(KeeperError::NoNode)?;
        parent_node.children.insert(node_name(path).to_string());
        parent_node.cversion += 1;
        parent_node.pzxid = zxid;

        let node = DataNode::new(data, ephemeral_owner, zxid, time);
        let stat = node.stat();
        self.nodes.insert(path.to_string(), node);

        if ephemeral_owner != 0 {
            self.ephemerals.entry(ephemeral_owner).or_default().insert(path.to_string());
        }

        trace!(%path, zxid, ephemeral_owner, "node created");
        Ok((
            stat,
            vec![
                WatchTrigger::new(path, EventType::NodeCreated),
                WatchTrigger::new(&parent, EventType::NodeChildrenChanged),
            ],
        ))
    }

    /// Deletes a childless node.
    ///
    /// Fires NodeDeleted on the path and NodeChildrenChanged on the parent.
    pub fn delete_node(
        &mut self,
        path: &str,
        expected_version: i32,
        zxid: Zxid,
    ) -> TreeResult<Vec<WatchTrigger>> {
        self.check_delete(path, expected_version)?;
        let parent = parent_path(path).ok_or(KeeperError::BadArguments)?.to_string();

        let node = self.nodes.remove(path).ok_or(KeeperError::NoNode)?;
        if node.is_ephemeral() {
            if let Some(paths) = self.ephemerals.get_mut(&node.ephemeral_owner) {
                paths.remove(path);
                if paths.is_empty() {
                    self.ephemerals.remove(&node.ephemeral_owner);
                }
            }
        }

        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.remove(node_name(path));
            parent_node.cversion += 1;
            parent_node.pzxid = zxid;
        }

        trace!(%path, zxid, "node deleted");
        Ok(vec![
            WatchTrigger::new(path, EventType::NodeDeleted),
            WatchTrigger::new(&parent, EventType::NodeChildrenChanged),
        ])
    }

    /// Replaces the payload; the version always moves by exactly one.
    pub fn set_data(
        &mut self,
        path: &str,
        data: Vec<u8>,
        expected_version: i32,
        zxid: Zxid,
        time: u64,
    ) -> TreeResult<(Stat, Vec<WatchTrigger>)> {
        self.check_set_data(path, expected_version)?;
        let node = self.nodes.get_mut(path).ok_or(KeeperError::NoNode)?;
        node.data = data;
        node.version += 1;
        node.mzxid = zxid;
        node.mtime = time;

        trace!(%path, zxid, version = node.version, "node data set");
        Ok((node.stat(), vec![WatchTrigger::new(path, EventType::NodeDataChanged)]))
    }

    /// Removes every ephemeral node owned by `session_id`, in path order.
    pub fn kill_session(
        &mut self,
        session_id: SessionId,
        zxid: Zxid,
    ) -> Vec<WatchTrigger> {
        let mut triggers = Vec::new();
        for path in self.ephemerals(session_id) {
            match self.delete_node(&path, -1, zxid) {
                Ok(fired) => triggers.extend(fired),
                // Ephemerals never have children, so only a vanished node can fail
                Err(e) => trace!(%path, session_id, "ephemeral already gone: {}", e),
            }
        }
        self.ephemerals.remove(&session_id);
        triggers
    }

    /// Total payload bytes held by the tree
    pub fn approximate_data_size(&self) -> usize {
        self.nodes.iter().map(|(path, node)| path.len() + node.data.len()).sum()
    }

    /// Structural equality including metadata, used to verify replay determinism
    pub fn same_state(
        &self,
        other: &DataTree,
    ) -> bool {
        if self.nodes.len() != other.nodes.len() {
            return false;
        }
        self.nodes.iter().all(|(path, node)| {
            other.nodes.get(path).is_some_and(|o| {
                o.stat() == node.stat() && o.data == node.data && o.children == node.children
            })
        })
    }
}

fn check_version(
    node: &DataNode,
    expected_version: i32,
) -> TreeResult<()> {
    if expected_version >= 0 && node.version != expected_version {
        return Err(KeeperError::BadVersion);
    }
    Ok(())
}
