//! Messages exchanged by the failure agreement protocol.
//!
//! Nodes never share memory: every piece of evidence travels as a [MeshMessage]. The encoding
//! produced by [MeshMessage::to_bytes] is private to the cluster.
use crate::node_id::{ids_to_string, NodeId};
use crate::Result;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Mailbox queue a message is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// Local fault observations.
    Failure,
    /// Everything else (reports, forwards, heartbeats).
    Default,
}

/// A local trigger for arbitration: either a transport level disconnect (`witnessed`) or a fault
/// learned from somebody else's report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultObservation {
    pub observer: NodeId,
    pub faulting_node: NodeId,
    pub witnessed: bool,
    /// The survivor set of the report this fault was learned from, if any.
    pub survivors: Option<BTreeSet<NodeId>>,
}

impl FaultObservation {
    /// A fault seen directly by `observer`.
    pub fn witnessed(observer: NodeId, faulting_node: NodeId) -> FaultObservation {
        FaultObservation { observer, faulting_node, witnessed: true, survivors: None }
    }

    /// A fault `observer` learned from a report carrying `survivors`.
    pub fn relayed(
        observer: NodeId,
        faulting_node: NodeId,
        survivors: Option<BTreeSet<NodeId>>,
    ) -> FaultObservation {
        FaultObservation { observer, faulting_node, witnessed: false, survivors }
    }
}

impl fmt::Display for FaultObservation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "FAULT({} -> {}, witnessed: {})",
            self.observer, self.faulting_node, self.witnessed
        )
    }
}

/// The gossip unit of a round: "as of now `source` considers `failures` suspect and `survivors`
/// (itself included) alive".
///
/// A failure the source witnessed itself is absent from `survivors`; a failure it only heard
/// about stays in `survivors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteFailureReport {
    pub source: NodeId,
    pub survivors: BTreeSet<NodeId>,
    pub failures: BTreeSet<NodeId>,
    /// Last transaction id known to be safe, per suspected initiator.
    pub safe_txn_ids: BTreeMap<NodeId, i64>,
}

impl SiteFailureReport {
    pub fn new(
        source: NodeId,
        survivors: BTreeSet<NodeId>,
        failures: BTreeSet<NodeId>,
        safe_txn_ids: BTreeMap<NodeId, i64>,
    ) -> SiteFailureReport {
        SiteFailureReport { source, survivors, failures, safe_txn_ids }
    }

    /// Whether the source lost `node` itself.
    pub fn is_witnessed(&self, node: NodeId) -> bool {
        self.failures.contains(&node) && !self.survivors.contains(&node)
    }

    /// Whether the source suspects `node` yet still reaches it.
    pub fn is_suspected_alive(&self, node: NodeId) -> bool {
        self.failures.contains(&node) && self.survivors.contains(&node)
    }

    /// The suspects of this report with their witnessed flag.
    pub fn in_trouble(&self) -> BTreeMap<NodeId, bool> {
        self.failures.iter().map(|id| (*id, self.is_witnessed(*id))).collect()
    }
}

impl fmt::Display for SiteFailureReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "REPORT(from {}, failures: {}, survivors: {})",
            self.source,
            ids_to_string(&self.failures),
            ids_to_string(&self.survivors)
        )
    }
}

/// A report relayed by `forwarded_by` to peers that cannot hear `inner.source` directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedReport {
    pub forwarded_by: NodeId,
    pub inner: SiteFailureReport,
}

impl fmt::Display for ForwardedReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FORWARD(by {}, {})", self.forwarded_by, self.inner)
    }
}

/// Liveness ping sent while a round waits on a quiet network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub source: NodeId,
    pub last_safe_txn_id: i64,
}

/// Evidence accepted by the agreement seeker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    Report(SiteFailureReport),
    Forwarded(ForwardedReport),
}

impl Evidence {
    /// The report, whoever delivered it.
    pub fn report(&self) -> &SiteFailureReport {
        match self {
            Evidence::Report(report) => report,
            Evidence::Forwarded(forwarded) => &forwarded.inner,
        }
    }

    /// The node the evidence is credited to. Forwarders do not count.
    pub fn source(&self) -> NodeId {
        self.report().source
    }

    pub fn into_report(self) -> SiteFailureReport {
        match self {
            Evidence::Report(report) => report,
            Evidence::Forwarded(forwarded) => forwarded.inner,
        }
    }
}

impl From<SiteFailureReport> for Evidence {
    fn from(report: SiteFailureReport) -> Self {
        Evidence::Report(report)
    }
}

impl From<ForwardedReport> for Evidence {
    fn from(forwarded: ForwardedReport) -> Self {
        Evidence::Forwarded(forwarded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshMessage {
    Fault(FaultObservation),
    Report(SiteFailureReport),
    Forward(ForwardedReport),
    Heartbeat(Heartbeat),
}

impl MeshMessage {
    pub fn subject(&self) -> Subject {
        match self {
            MeshMessage::Fault(_) => Subject::Failure,
            MeshMessage::Report(_) | MeshMessage::Forward(_) | MeshMessage::Heartbeat(_) => {
                Subject::Default
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<MeshMessage> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl fmt::Display for MeshMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MeshMessage::Fault(fault) => write!(f, "{}", fault),
            MeshMessage::Report(report) => write!(f, "{}", report),
            MeshMessage::Forward(forwarded) => write!(f, "{}", forwarded),
            MeshMessage::Heartbeat(heartbeat) => {
                write!(f, "HEARTBEAT(from {}, safe: {})", heartbeat.source, heartbeat.last_safe_txn_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u64]) -> BTreeSet<NodeId> {
        raw.iter().map(|id| NodeId::new(*id)).collect()
    }

    #[test]
    fn test_witnessed_failures() {
        // 1 lost 2 itself, heard about 3
        let report = SiteFailureReport::new(
            NodeId::new(1),
            ids(&[1, 3, 4]),
            ids(&[2, 3]),
            BTreeMap::new(),
        );
        assert!(report.is_witnessed(NodeId::new(2)));
        assert!(!report.is_witnessed(NodeId::new(3)));
        assert!(report.is_suspected_alive(NodeId::new(3)));
        assert!(!report.is_witnessed(NodeId::new(4)));

        let in_trouble = report.in_trouble();
        assert_eq!(in_trouble.get(&NodeId::new(2)), Some(&true));
        assert_eq!(in_trouble.get(&NodeId::new(3)), Some(&false));
        assert_eq!(in_trouble.len(), 2);
    }

    #[test]
    fn test_forwarded_evidence_is_credited_to_source() {
        let report =
            SiteFailureReport::new(NodeId::new(4), ids(&[1, 2, 4]), ids(&[3]), BTreeMap::new());
        let evidence: Evidence =
            ForwardedReport { forwarded_by: NodeId::new(1), inner: report.clone() }.into();
        assert_eq!(evidence.source(), NodeId::new(4));
        assert_eq!(evidence.into_report(), report);
    }

    #[test]
    fn test_subjects() {
        let fault = MeshMessage::Fault(FaultObservation::witnessed(NodeId::new(1), NodeId::new(2)));
        let heartbeat =
            MeshMessage::Heartbeat(Heartbeat { source: NodeId::new(1), last_safe_txn_id: 7 });
        assert_eq!(fault.subject(), Subject::Failure);
        assert_eq!(heartbeat.subject(), Subject::Default);
        assert!(Subject::Failure < Subject::Default);
    }

    #[test]
    fn test_wire_encoding() {
        let mut safe_txn_ids = BTreeMap::new();
        safe_txn_ids.insert(NodeId::new(3), 42i64);
        let report = SiteFailureReport::new(NodeId::new(1), ids(&[1, 2]), ids(&[3]), safe_txn_ids);
        let message =
            MeshMessage::Forward(ForwardedReport { forwarded_by: NodeId::new(2), inner: report });

        let bytes = message.to_bytes().unwrap();
        assert_eq!(MeshMessage::from_bytes(&bytes).unwrap(), message);
        assert!(MeshMessage::from_bytes(&bytes[..bytes.len() / 2]).is_err());
    }
}
