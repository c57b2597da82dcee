use crate::colored::Colorize;
use crate::message::{Evidence, SiteFailureReport};
use crate::node_id::{ids_to_string, NodeId};

use super::strategy::ArbitrationStrategy;

use tracing::{debug, trace};

use std::collections::{BTreeMap, BTreeSet};

/// Evidence aggregator of one arbitration round, as seen from `self_id`.
///
/// The seeker performs no I/O. It is fed the local node's own suspicions through
/// [start_seeking_for](AgreementSeeker::start_seeking_for) and everybody's reports through
/// [add](AgreementSeeker::add), and answers three questions:
///
/// * is the evidence complete and consistent, and if so who has to go ([next_kill]);
/// * is the local node blind to a report it needs because of a broken link ([need_forward]);
/// * which peers are blind to a given node's report ([for_whom_site_is_dead]).
///
/// [next_kill]: AgreementSeeker::next_kill
/// [need_forward]: AgreementSeeker::need_forward
/// [for_whom_site_is_dead]: AgreementSeeker::for_whom_site_is_dead
#[derive(Debug, Clone)]
pub struct AgreementSeeker {
    self_id: NodeId,
    strategy: ArbitrationStrategy,
    /// Membership the round expects reports from.
    hsids: BTreeSet<NodeId>,
    /// Suspects of the round, flagged when the local node lost them itself.
    in_trouble: BTreeMap<NodeId, bool>,
    survivors: BTreeSet<NodeId>,
    /// Members the local node still hears from; every one of them has to report.
    reporters: BTreeSet<NodeId>,
    /// Latest report per source.
    reports: BTreeMap<NodeId, SiteFailureReport>,
    /// Only ever grows within a round.
    killed: BTreeSet<NodeId>,
}

impl AgreementSeeker {
    pub fn new(self_id: NodeId, strategy: ArbitrationStrategy) -> AgreementSeeker {
        AgreementSeeker {
            self_id,
            strategy,
            hsids: BTreeSet::new(),
            in_trouble: BTreeMap::new(),
            survivors: BTreeSet::new(),
            reporters: BTreeSet::new(),
            reports: BTreeMap::new(),
            killed: BTreeSet::new(),
        }
    }

    /// Opens a round for `membership` or extends the open one.
    ///
    /// Suspects are merged into the round and a witnessed flag is never downgraded. When the
    /// membership changed, reports from sources that left it are dropped; everything else that
    /// was collected is kept.
    pub fn start_seeking_for(
        &mut self,
        membership: &BTreeSet<NodeId>,
        initial: &BTreeMap<NodeId, bool>,
    ) {
        if *membership != self.hsids {
            self.hsids = membership.clone();
            let hsids = &self.hsids;
            self.reports.retain(|source, _| hsids.contains(source));
        }
        for (id, witnessed) in initial.iter() {
            if !self.hsids.contains(id) {
                continue;
            }
            // nobody witnesses their own loss
            let witnessed = *witnessed && *id != self.self_id;
            let entry = self.in_trouble.entry(*id).or_insert(false);
            *entry = *entry || witnessed;
        }
        self.reporters = self
            .hsids
            .iter()
            .filter(|id| **id == self.self_id || !self.in_trouble.get(*id).cloned().unwrap_or(false))
            .cloned()
            .collect();
        self.survivors = self.compute_survivors();
        debug!(
            "{} seeking for {}, survivors {}",
            "[seeker]".yellow(),
            ids_to_string(self.in_trouble.keys()),
            ids_to_string(&self.survivors)
        );
        self.settle();
    }

    /// Ingests a report, direct or forwarded. A later report from the same source replaces the
    /// earlier one; reports from outside the expected membership are ignored.
    pub fn add<E: Into<Evidence>>(&mut self, evidence: E) {
        let report = evidence.into().into_report();
        if !self.hsids.contains(&report.source) {
            trace!("{} dropping report from non member {}", "[seeker]".yellow(), report.source);
            return;
        }
        let _ = self.reports.insert(report.source, report);
        self.settle();
    }

    /// The nodes the round decided to evict, in ascending order. Empty until every surviving
    /// node has reported consistently.
    pub fn next_kill(&self) -> Vec<NodeId> {
        self.killed.iter().cloned().collect()
    }

    /// Whether some node the local node lost is still reachable by others and its report has
    /// not reached us yet. Such a report can only arrive forwarded.
    pub fn need_forward(&self) -> bool {
        if self.strategy == ArbitrationStrategy::NoQuarter {
            return false;
        }
        self.hsids.iter().filter(|n| **n != self.self_id).any(|n| {
            self.sees_dead(self.self_id, *n)
                && !self.reports.contains_key(n)
                && self
                    .survivors
                    .iter()
                    .filter(|s| **s != self.self_id && *s != n)
                    .any(|s| self.reports.get(s).map_or(false, |r| r.is_suspected_alive(*n)))
        })
    }

    /// Survivors that lost `node` themselves while the local node still reaches it: the peers
    /// `node`'s report has to be forwarded to.
    pub fn for_whom_site_is_dead(&self, node: NodeId) -> BTreeSet<NodeId> {
        if !self.survivors.contains(&node) {
            return BTreeSet::new();
        }
        self.survivors
            .iter()
            .filter(|s| **s != self.self_id && **s != node)
            .filter(|s| self.reports.get(*s).map_or(false, |r| r.is_witnessed(node)))
            .cloned()
            .collect()
    }

    /// Whether every reporter has sent a report covering every suspect of the round.
    pub fn have_enough(&self) -> bool {
        if self.in_trouble.is_empty() {
            return false;
        }
        self.reporters.iter().filter(|s| **s != self.self_id).all(|s| self.covers_round(*s))
    }

    /// Reporters whose report is missing or does not cover every suspect yet.
    pub fn missing_reporters(&self) -> BTreeSet<NodeId> {
        self.reporters
            .iter()
            .filter(|s| **s != self.self_id && !self.covers_round(**s))
            .cloned()
            .collect()
    }

    pub fn survivors(&self) -> &BTreeSet<NodeId> {
        &self.survivors
    }

    /// Members not witnessed dead by the local node. Same as the survivors under
    /// MatchingCardinality; under NoQuarter it also holds the suspects still within reach.
    pub fn reporters(&self) -> &BTreeSet<NodeId> {
        &self.reporters
    }

    pub fn expected_membership(&self) -> &BTreeSet<NodeId> {
        &self.hsids
    }

    pub fn in_trouble(&self) -> &BTreeMap<NodeId, bool> {
        &self.in_trouble
    }

    pub fn strategy(&self) -> ArbitrationStrategy {
        self.strategy
    }

    /// Closes the round.
    pub fn clear(&mut self) {
        self.hsids.clear();
        self.in_trouble.clear();
        self.survivors.clear();
        self.reporters.clear();
        self.reports.clear();
        self.killed.clear();
    }

    fn compute_survivors(&self) -> BTreeSet<NodeId> {
        let self_id = self.self_id;
        match self.strategy {
            ArbitrationStrategy::MatchingCardinality => self.reporters.clone(),
            ArbitrationStrategy::NoQuarter => self
                .hsids
                .iter()
                .filter(|id| **id == self_id || !self.in_trouble.contains_key(*id))
                .cloned()
                .collect(),
        }
    }

    fn covers_round(&self, source: NodeId) -> bool {
        match self.reports.get(&source) {
            Some(report) => self
                .in_trouble
                .keys()
                .filter(|id| **id != source)
                .all(|id| report.failures.contains(id)),
            None => false,
        }
    }

    /// Whether `a` lost `b` itself. The local node's own suspicions count as its report.
    fn sees_dead(&self, a: NodeId, b: NodeId) -> bool {
        if a == self.self_id && self.in_trouble.get(&b).cloned().unwrap_or(false) {
            return true;
        }
        self.reports.get(&a).map_or(false, |r| r.is_witnessed(b))
    }

    fn link_broken(&self, a: NodeId, b: NodeId) -> bool {
        self.sees_dead(a, b) || self.sees_dead(b, a)
    }

    fn settle(&mut self) {
        if !self.have_enough() || self.need_forward() {
            return;
        }
        let picked = self.pick();
        if !picked.is_subset(&self.killed) {
            debug!("{} kill set {}", "[seeker]".yellow(), ids_to_string(&picked));
        }
        self.killed.extend(picked);
    }

    fn pick(&self) -> BTreeSet<NodeId> {
        match self.strategy {
            ArbitrationStrategy::MatchingCardinality => self.pick_matching_cardinality(),
            ArbitrationStrategy::NoQuarter => self
                .hsids
                .iter()
                .filter(|n| **n != self.self_id)
                .filter(|n| {
                    self.sees_dead(self.self_id, **n)
                        || self.reports.keys().any(|source| self.sees_dead(*source, **n))
                })
                .cloned()
                .collect(),
        }
    }

    // Cuts survivors until no two remaining nodes disagree about each other, the node with the
    // most broken links first.
    fn pick_matching_cardinality(&self) -> BTreeSet<NodeId> {
        let mut kill: BTreeSet<NodeId> = self.hsids.difference(&self.survivors).cloned().collect();
        let mut alive = self.survivors.clone();
        loop {
            let mut degrees: BTreeMap<NodeId, usize> = BTreeMap::new();
            for a in alive.iter() {
                for b in alive.range(*a..).skip(1) {
                    if self.link_broken(*a, *b) {
                        *degrees.entry(*a).or_insert(0) += 1;
                        *degrees.entry(*b).or_insert(0) += 1;
                    }
                }
            }
            let victim = degrees
                .iter()
                .filter(|(id, _)| **id != self.self_id)
                .max_by_key(|(id, degree)| (**degree, **id))
                .map(|(id, _)| *id);
            match victim {
                Some(id) => {
                    let _ = alive.remove(&id);
                    let _ = kill.insert(id);
                }
                None => break,
            }
        }
        kill
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::message::ForwardedReport;

    fn id(raw: u64) -> NodeId {
        NodeId::new(raw)
    }

    fn ids(raw: &[u64]) -> BTreeSet<NodeId> {
        raw.iter().map(|n| id(*n)).collect()
    }

    fn suspects(raw: &[(u64, bool)]) -> BTreeMap<NodeId, bool> {
        raw.iter().map(|(n, witnessed)| (id(*n), *witnessed)).collect()
    }

    fn report(source: u64, survivors: &[u64], failures: &[u64]) -> SiteFailureReport {
        let safe_txn_ids = failures.iter().map(|n| (id(*n), 10)).collect();
        SiteFailureReport::new(id(source), ids(survivors), ids(failures), safe_txn_ids)
    }

    fn seeker(self_id: u64, membership: &[u64], initial: &[(u64, bool)]) -> AgreementSeeker {
        let mut seeker = AgreementSeeker::new(id(self_id), ArbitrationStrategy::MatchingCardinality);
        seeker.start_seeking_for(&ids(membership), &suspects(initial));
        seeker
    }

    #[test]
    fn test_single_failure() {
        for me in [1u64, 3, 4].iter() {
            let mut s = seeker(*me, &[1, 2, 3, 4], &[(2, true)]);
            assert_eq!(s.survivors(), &ids(&[1, 3, 4]));

            let others = [1u64, 3, 4].iter().filter(|n| *n != me).cloned().collect::<Vec<u64>>();
            s.add(report(others[0], &[1, 3, 4], &[2]));
            assert!(s.next_kill().is_empty());
            assert!(!s.have_enough());

            s.add(report(others[1], &[1, 3, 4], &[2]));
            assert_eq!(s.next_kill(), vec![id(2)]);
            assert!(!s.need_forward());
        }
    }

    #[test]
    fn test_two_simultaneous_failures() {
        let mut one = seeker(1, &[1, 2, 3, 4], &[(2, true), (3, true)]);
        let mut four = seeker(4, &[1, 2, 3, 4], &[(2, true), (3, true)]);
        one.add(report(4, &[1, 4], &[2, 3]));
        four.add(report(1, &[1, 4], &[2, 3]));

        assert_eq!(one.next_kill(), vec![id(2), id(3)]);
        assert_eq!(four.next_kill(), vec![id(2), id(3)]);
        assert!(!one.need_forward());
        assert!(!four.need_forward());
    }

    #[test]
    fn test_report_must_cover_every_suspect() {
        let mut s = seeker(1, &[1, 2, 3, 4], &[(2, true), (3, true)]);
        s.add(report(4, &[1, 3, 4], &[2]));
        assert!(!s.have_enough());
        assert_eq!(s.missing_reporters(), ids(&[4]));
        assert!(s.next_kill().is_empty());

        s.add(report(4, &[1, 4], &[2, 3]));
        assert!(s.missing_reporters().is_empty());
        assert_eq!(s.next_kill(), vec![id(2), id(3)]);
    }

    // Link 3 <-> 4 is down, both still reach 1 and 2.
    fn one_link_down() -> (SiteFailureReport, SiteFailureReport, SiteFailureReport, SiteFailureReport)
    {
        (
            report(1, &[1, 2, 3, 4], &[3, 4]),
            report(2, &[1, 2, 3, 4], &[3, 4]),
            report(3, &[1, 2, 3], &[3, 4]),
            report(4, &[1, 2, 4], &[3, 4]),
        )
    }

    #[test]
    fn test_one_link_down() {
        let (r1, r2, r3, r4) = one_link_down();

        let mut one = seeker(1, &[1, 2, 3, 4], &[(3, false), (4, false)]);
        let mut two = seeker(2, &[1, 2, 3, 4], &[(3, false), (4, false)]);
        let mut three = seeker(3, &[1, 2, 3, 4], &[(4, true), (3, false)]);
        let mut four = seeker(4, &[1, 2, 3, 4], &[(3, true), (4, false)]);

        for r in [&r2, &r3, &r4].iter() {
            one.add((*r).clone());
        }
        for r in [&r1, &r3, &r4].iter() {
            two.add((*r).clone());
        }
        for r in [&r1, &r2, &r3].iter() {
            three.add((*r).clone());
        }
        for r in [&r1, &r2, &r4].iter() {
            four.add((*r).clone());
        }

        assert!(!one.need_forward());
        assert!(!two.need_forward());
        assert!(three.need_forward());
        assert!(four.need_forward());
        assert_eq!(one.for_whom_site_is_dead(id(4)), ids(&[3]));
        assert_eq!(one.for_whom_site_is_dead(id(3)), ids(&[4]));
        assert!(one.for_whom_site_is_dead(id(2)).is_empty());
        assert!(three.for_whom_site_is_dead(id(4)).is_empty());
        assert!(three.next_kill().is_empty());
        assert!(four.next_kill().is_empty());

        three.add(ForwardedReport { forwarded_by: id(1), inner: r4.clone() });
        four.add(ForwardedReport { forwarded_by: id(1), inner: r3.clone() });

        assert!(!three.need_forward());
        assert!(!four.need_forward());
        assert_eq!(one.next_kill(), vec![id(4)]);
        assert_eq!(two.next_kill(), vec![id(4)]);
        assert_eq!(three.next_kill(), vec![id(4)]);
        assert_eq!(four.next_kill(), vec![id(3)]);
    }

    #[test]
    fn test_duplicate_report_is_idempotent() {
        let (_, r2, r3, r4) = one_link_down();
        let mut one = seeker(1, &[1, 2, 3, 4], &[(3, false), (4, false)]);
        one.add(r2.clone());
        one.add(r3.clone());

        let before = (one.next_kill(), one.need_forward());
        one.add(r3.clone());
        assert_eq!((one.next_kill(), one.need_forward()), before);

        one.add(r4.clone());
        let before = (one.next_kill(), one.need_forward());
        one.add(r4);
        assert_eq!((one.next_kill(), one.need_forward()), before);
        assert_eq!(one.next_kill(), vec![id(4)]);
    }

    #[test]
    fn test_kill_list_is_monotonic() {
        let (_, r2, r3, r4) = one_link_down();
        let mut one = seeker(1, &[1, 2, 3, 4], &[(3, false), (4, false)]);
        one.add(r2);
        one.add(r3);
        one.add(r4);
        assert_eq!(one.next_kill(), vec![id(4)]);

        // the link heals, 3 no longer reports 4 lost
        one.add(report(3, &[1, 2, 3, 4], &[3, 4]));
        assert_eq!(one.next_kill(), vec![id(4)]);
    }

    #[test]
    fn test_stale_source_is_ignored() {
        let mut s = seeker(1, &[1, 2, 3, 4], &[(2, true)]);
        s.add(report(3, &[1, 3, 4], &[2]));
        let before = (s.next_kill(), s.need_forward());

        s.add(report(9, &[9], &[1, 3, 4]));
        assert_eq!((s.next_kill(), s.need_forward()), before);
        assert!(s.next_kill().is_empty());
    }

    #[test]
    fn test_no_evidence_no_decision() {
        let s = seeker(1, &[1, 2, 3, 4], &[(2, true)]);
        for _ in 0..3 {
            assert!(s.next_kill().is_empty());
            assert!(!s.need_forward());
            assert!(!s.have_enough());
        }
        assert_eq!(s.missing_reporters(), ids(&[3, 4]));
    }

    #[test]
    fn test_overlapping_faults_merge_into_round() {
        let mut s = seeker(1, &[1, 2, 3, 4], &[(2, true)]);
        s.add(report(4, &[1, 3, 4], &[2]));

        s.start_seeking_for(&ids(&[1, 2, 3, 4]), &suspects(&[(3, true), (2, false)]));
        assert_eq!(s.in_trouble(), &suspects(&[(2, true), (3, true)]));
        assert_eq!(s.survivors(), &ids(&[1, 4]));
        // 4 has not reported 3 yet
        assert!(s.next_kill().is_empty());

        s.add(report(4, &[1, 4], &[2, 3]));
        assert_eq!(s.next_kill(), vec![id(2), id(3)]);
    }

    #[test]
    fn test_membership_change_keeps_round() {
        let mut s = seeker(1, &[1, 2, 3, 4], &[(2, true)]);
        s.add(report(3, &[1, 3, 4], &[2]));
        s.add(report(4, &[1, 3, 4], &[]));
        assert!(s.next_kill().is_empty());

        s.start_seeking_for(&ids(&[1, 2, 3]), &BTreeMap::new());
        assert_eq!(s.expected_membership(), &ids(&[1, 2, 3]));
        assert_eq!(s.survivors(), &ids(&[1, 3]));
        assert_eq!(s.next_kill(), vec![id(2)]);
    }

    #[test]
    fn test_local_node_is_never_killed() {
        // 2 lost the local node, everybody else reaches both
        let mut s = seeker(1, &[1, 2, 3], &[(1, false)]);
        s.add(report(2, &[2, 3], &[1]));
        s.add(report(3, &[1, 2, 3], &[1]));
        assert!(!s.need_forward());
        assert_eq!(s.next_kill(), vec![id(2)]);
    }

    #[test]
    fn test_no_quarter() {
        let (_, r2, r3, r4) = one_link_down();
        let mut one = AgreementSeeker::new(id(1), ArbitrationStrategy::NoQuarter);
        one.start_seeking_for(&ids(&[1, 2, 3, 4]), &suspects(&[(3, false), (4, false)]));
        assert_eq!(one.survivors(), &ids(&[1, 2]));
        assert_eq!(one.reporters(), &ids(&[1, 2, 3, 4]));

        one.add(r3);
        one.add(r4);
        assert!(!one.have_enough());
        one.add(r2);
        assert!(!one.need_forward());
        assert_eq!(one.next_kill(), vec![id(3), id(4)]);
    }

    #[test]
    fn test_no_quarter_waits_for_both_ends_of_a_link() {
        let r1 = report(1, &[1, 3, 4], &[2]);
        let r2 = report(2, &[2, 3, 4], &[1]);
        let mut three = AgreementSeeker::new(id(3), ArbitrationStrategy::NoQuarter);
        three.start_seeking_for(&ids(&[1, 2, 3, 4]), &suspects(&[(2, false)]));
        assert_eq!(three.survivors(), &ids(&[1, 3, 4]));
        assert_eq!(three.reporters(), &ids(&[1, 2, 3, 4]));

        three.add(r1);
        three.add(report(4, &[1, 2, 3, 4], &[2]));
        assert!(!three.have_enough());
        assert_eq!(three.missing_reporters(), ids(&[2]));
        assert!(three.next_kill().is_empty());

        // the report of 2 names 1
        three.add(r2);
        three.start_seeking_for(&ids(&[1, 2, 3, 4]), &suspects(&[(1, false), (2, false)]));
        assert_eq!(three.survivors(), &ids(&[3, 4]));
        three.add(report(4, &[1, 2, 3, 4], &[1, 2]));
        assert!(three.have_enough());
        assert!(!three.need_forward());
        assert_eq!(three.next_kill(), vec![id(1), id(2)]);
    }

    #[test]
    fn test_clear() {
        let mut s = seeker(1, &[1, 2, 3], &[(2, true)]);
        s.add(report(3, &[1, 3], &[2]));
        assert_eq!(s.next_kill(), vec![id(2)]);

        s.clear();
        assert!(s.next_kill().is_empty());
        assert!(s.in_trouble().is_empty());
        assert!(s.expected_membership().is_empty());
    }
}
