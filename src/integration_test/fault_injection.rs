use crate::agreement::ArbitrationStrategy;
use crate::integration_test::test_utils::*;

use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use tracing::debug;

use std::collections::BTreeSet;

const ROUNDS: usize = 12;

// Crashes a random minority of a random cluster, possibly severing one link between two
// survivors, and checks every survivor resolves to the expected eviction.
#[test]
fn test_random_crashes() {
    let mut rng = thread_rng();
    for round in 0..ROUNDS {
        let size = rng.gen_range(3, 8);
        let mut hosts: Vec<u32> = (1..=size).collect();
        hosts.shuffle(&mut rng);
        let kills = rng.gen_range(0, (size - 1) / 2 + 1) as usize;
        let sever = kills == 0 || rng.gen_range(0, 2) == 1;

        let mut victims = hosts[..kills].to_vec();
        victims.sort();
        let link = if sever {
            let (a, b) = (hosts[kills], hosts[kills + 1]);
            Some((a.min(b), a.max(b)))
        } else {
            None
        };

        let mut cluster = cluster(size, ArbitrationStrategy::MatchingCardinality);
        for id in 1..=size {
            cluster.set_safe_txn_id(host(id), rng.gen_range(0, 1000));
        }
        debug!("round {}: {} hosts, killing {:?}, severing {:?}", round, size, victims, link);
        if let Some((a, b)) = link {
            cluster.sever(host(a), host(b));
        }
        for id in victims.iter() {
            cluster.kill(host(*id));
        }

        let results = cluster.resolve(DEADLINE);
        assert_eq!(results.len(), size as usize - victims.len());
        for id in cluster.survivors().into_iter() {
            let mut evicted: BTreeSet<u32> = victims.iter().cloned().collect();
            match link {
                // the higher end only ever gives up on the lower one
                Some((a, b)) if id == host(b) => {
                    let _ = evicted.insert(a);
                }
                Some((_, b)) => {
                    let _ = evicted.insert(b);
                }
                None => (),
            }
            let evicted: Vec<u32> = evicted.into_iter().collect();
            assert_decided(&results, id, &decision_of(&cluster, &evicted));
        }
    }
}
