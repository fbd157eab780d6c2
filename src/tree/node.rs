use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::SessionId;
use crate::Zxid;

/// Node metadata returned to clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// zxid of the change that created the node
    pub czxid: Zxid,
    /// zxid of the last payload change
    pub mzxid: Zxid,
    /// zxid of the last child list change
    pub pzxid: Zxid,
    pub ctime: u64,
    pub mtime: u64,
    /// Payload version, 0 at creation, +1 per set
    pub version: i32,
    /// Child list version, +1 per child create or delete
    pub cversion: i32,
    /// Owning session for ephemeral nodes, 0 otherwise
    pub ephemeral_owner: SessionId,
    pub data_length: u32,
    pub num_children: u32,
}

/// A named entry in the tree. Owned exclusively by [`crate::DataTree`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataNode {
    pub(crate) data: Vec<u8>,
    pub(crate) children: BTreeSet<String>,
    pub(crate) czxid: Zxid,
    pub(crate) mzxid: Zxid,
    pub(crate) pzxid: Zxid,
    pub(crate) ctime: u64,
    pub(crate) mtime: u64,
    pub(crate) version: i32,
    pub(crate) cversion: i32,
    pub(crate) ephemeral_owner: SessionId,
}

impl DataNode {
    pub(crate) fn new(
        data: Vec<u8>,
        ephemeral_owner: SessionId,
        zxid: Zxid,
        time: u64,
    ) -> Self {
        Self {
            data,
            children: BTreeSet::new(),
            czxid: zxid,
            mzxid: zxid,
            pzxid: zxid,
            ctime: time,
            mtime: time,
            version: 0,
            cversion: 0,
            ephemeral_owner,
        }
    }

    pub fn stat(&self) -> Stat {
        Stat {
            czxid: self.czxid,
            mzxid: self.mzxid,
            pzxid: self.pzxid,
            ctime: self.ctime,
            mtime: self.mtime,
            version: self.version,
            cversion: self.cversion,
            ephemeral_owner: self.ephemeral_owner,
            data_length: self.data.len() as u32,
            num_children: self.children.len() as u32,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}
