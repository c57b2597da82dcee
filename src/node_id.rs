//! Cluster member identifiers
//!
//! See the documentation of [NodeId] for details.

use std::fmt;
use std::str::FromStr;

/// Identifier of a cluster member ("site").
///
/// The `NodeId` wraps a 64-bit value whose upper half names the host the site runs on and whose
/// lower half names the site within that host. Ids are totally ordered by their raw value, which
/// is what every deterministic tie-break in the agreement protocol relies on.
///
/// They are displayed as `host:site`.
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Copy, Clone, Serialize, Deserialize, Default)]
pub struct NodeId(u64);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host_id(), self.site_id())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host_id(), self.site_id())
    }
}

impl FromStr for NodeId {
    type Err = crate::Error;

    /// Parses either `host:site` or a raw decimal value.
    fn from_str(id_str: &str) -> Result<Self, crate::Error> {
        match id_str.trim().split_once(':') {
            Some((host, site)) => {
                let host = host.parse::<u32>().map_err(|_| crate::Error::TryFromStringError)?;
                let site = site.parse::<u32>().map_err(|_| crate::Error::TryFromStringError)?;
                Ok(NodeId::from_parts(host, site))
            }
            None => {
                let raw =
                    id_str.trim().parse::<u64>().map_err(|_| crate::Error::TryFromStringError)?;
                Ok(NodeId(raw))
            }
        }
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        NodeId(raw)
    }
}

impl NodeId {
    /// Wraps a raw identifier.
    pub fn new(raw: u64) -> NodeId {
        NodeId(raw)
    }

    /// Composes an id from a host id and a site id on that host.
    pub fn from_parts(host_id: u32, site_id: u32) -> NodeId {
        NodeId(((host_id as u64) << 32) | site_id as u64)
    }

    /// The host this site runs on.
    pub fn host_id(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn site_id(&self) -> u32 {
        self.0 as u32
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Renders a collection of ids as `[h:s, h:s, ...]` for log lines.
pub fn ids_to_string<'a, I>(ids: I) -> String
where
    I: IntoIterator<Item = &'a NodeId>,
{
    let parts = ids.into_iter().map(|id| id.to_string()).collect::<Vec<String>>();
    format!("[{}]", parts.join(", "))
}
