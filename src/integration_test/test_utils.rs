use crate::agreement::{ArbiterConfig, ArbitrationStrategy};
use crate::node_id::NodeId;
use crate::sim::{Decision, SimCluster};
use crate::Result;

use std::collections::BTreeMap;
use std::time::Duration;

pub const DEADLINE: Duration = Duration::from_secs(10);

pub fn host(id: u32) -> NodeId {
    NodeId::from_parts(id, 0)
}

/// A cluster of hosts `1..=size` where host `h` last committed transaction `h * 10`.
pub fn cluster(size: u32, strategy: ArbitrationStrategy) -> SimCluster {
    let config = ArbiterConfig { strategy, ..ArbiterConfig::default() };
    let cluster = SimCluster::new((1..=size).map(host), config);
    for id in 1..=size {
        cluster.set_safe_txn_id(host(id), id as i64 * 10);
    }
    cluster
}

pub fn decision_of(cluster: &SimCluster, hosts: &[u32]) -> Decision {
    hosts.iter().map(|id| (host(*id), cluster.safe_txn_id(host(*id)))).collect()
}

pub fn assert_decided(results: &BTreeMap<NodeId, Result<Decision>>, id: NodeId, expected: &Decision) {
    match results.get(&id) {
        Some(Ok(decision)) => assert_eq!(decision, expected, "decision of {}", id),
        other => panic!("{} did not decide: {:?}", id, other),
    }
}
