use crate::agreement::ArbitrationStrategy;
use crate::integration_test::test_utils::*;
use crate::node_id::NodeId;

use std::collections::BTreeSet;

#[test]
fn test_every_survivor_evicts_a_crashed_node() {
    let mut cluster = cluster(4, ArbitrationStrategy::MatchingCardinality);
    cluster.kill(host(3));

    let results = cluster.resolve(DEADLINE);
    assert_eq!(results.len(), 3);
    let expected = decision_of(&cluster, &[3]);
    for id in cluster.survivors().into_iter() {
        assert_decided(&results, id, &expected);
    }
}

#[test]
fn test_two_crashes_are_evicted_together() {
    let mut cluster = cluster(5, ArbitrationStrategy::MatchingCardinality);
    cluster.kill(host(2));
    cluster.kill(host(5));

    let results = cluster.resolve(DEADLINE);
    let expected = decision_of(&cluster, &[2, 5]);
    for id in [1, 3, 4].iter() {
        assert_decided(&results, host(*id), &expected);
    }
}

#[test]
fn test_severed_link_evicts_the_higher_id() {
    let cluster = cluster(4, ArbitrationStrategy::MatchingCardinality);
    cluster.sever(host(1), host(2));

    let results = cluster.resolve(DEADLINE);
    assert_eq!(results.len(), 4);
    // the lower end of the link keeps its seat everywhere but on the higher end
    let lower_evicted = decision_of(&cluster, &[1]);
    let higher_evicted = decision_of(&cluster, &[2]);
    assert_decided(&results, host(1), &higher_evicted);
    assert_decided(&results, host(2), &lower_evicted);
    assert_decided(&results, host(3), &higher_evicted);
    assert_decided(&results, host(4), &higher_evicted);
}

#[test]
fn test_no_quarter_evicts_a_crashed_node() {
    let mut cluster = cluster(3, ArbitrationStrategy::NoQuarter);
    cluster.kill(host(1));

    let results = cluster.resolve(DEADLINE);
    let expected = decision_of(&cluster, &[1]);
    assert_decided(&results, host(2), &expected);
    assert_decided(&results, host(3), &expected);
}

#[test]
fn test_no_quarter_severed_link_evicts_both_ends() {
    let cluster = cluster(4, ArbitrationStrategy::NoQuarter);
    cluster.sever(host(1), host(2));

    let results = cluster.resolve(DEADLINE);
    assert_eq!(results.len(), 4);
    let both = decision_of(&cluster, &[1, 2]);
    // each end keeps itself and gives up on the other
    assert_decided(&results, host(1), &decision_of(&cluster, &[2]));
    assert_decided(&results, host(2), &decision_of(&cluster, &[1]));
    assert_decided(&results, host(3), &both);
    assert_decided(&results, host(4), &both);
}

#[test]
fn test_multi_site_hosts() {
    let ids: Vec<NodeId> = vec![(1, 0), (1, 1), (2, 0), (2, 1)]
        .into_iter()
        .map(|(h, s)| NodeId::from_parts(h, s))
        .collect();
    let mut cluster = crate::sim::SimCluster::new(ids.clone(), Default::default());
    cluster.set_safe_txn_id(ids[3], 44);
    cluster.kill(ids[3]);

    let results = cluster.resolve(DEADLINE);
    let expected = vec![(ids[3], 44)].into_iter().collect();
    for id in ids[..3].iter() {
        assert_decided(&results, *id, &expected);
    }
    let survivors: BTreeSet<NodeId> = ids[..3].iter().cloned().collect();
    assert_eq!(cluster.survivors(), survivors);
}
