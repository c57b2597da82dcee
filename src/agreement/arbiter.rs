use crate::colored::Colorize;
use crate::mailbox::Mailbox;
use crate::message::{
    Evidence, FaultObservation, ForwardedReport, MeshMessage, SiteFailureReport, Subject,
};
use crate::node_id::{ids_to_string, NodeId};

use super::aide::MeshAide;
use super::constants::*;
use super::discard::Discard;
use super::seeker::AgreementSeeker;
use super::strategy::ArbitrationStrategy;
use super::Result;

use tracing::{debug, info, trace, warn};

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

const SUBJECTS: [Subject; 2] = [Subject::Failure, Subject::Default];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterConfig {
    pub strategy: ArbitrationStrategy,
    /// Bounded wait of one receive; a heartbeat goes out each time it expires.
    pub receive_timeout: Duration,
    pub stall_report_after: Duration,
    pub stall_report_every: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        ArbiterConfig {
            strategy: ArbitrationStrategy::default(),
            receive_timeout: RECEIVE_TIMEOUT,
            stall_report_after: STALL_REPORT_AFTER,
            stall_report_every: STALL_REPORT_EVERY,
        }
    }
}

/// Per node control loop turning fault observations into eviction decisions.
///
/// The arbiter is the only part of the agreement protocol doing I/O. It is driven by a single
/// caller through [reconfigure_on_fault](MeshArbiter::reconfigure_on_fault), which blocks until
/// the round it opened or extended is resolved, or until a new fault interrupts it.
pub struct MeshArbiter<M, A> {
    self_id: NodeId,
    mailbox: M,
    aide: A,
    config: ArbiterConfig,
    seeker: AgreementSeeker,
    in_trouble: BTreeMap<NodeId, bool>,
    /// Nodes evicted by earlier rounds.
    failed_sites: BTreeSet<NodeId>,
    /// Safe transaction ids by (reporter, initiator).
    safe_txn_ledger: BTreeMap<(NodeId, NodeId), i64>,
    forward_candidates: BTreeMap<NodeId, ForwardedReport>,
}

impl<M: Mailbox, A: MeshAide> MeshArbiter<M, A> {
    pub fn new(self_id: NodeId, mailbox: M, aide: A, config: ArbiterConfig) -> MeshArbiter<M, A> {
        MeshArbiter {
            self_id,
            mailbox,
            aide,
            config,
            seeker: AgreementSeeker::new(self_id, config.strategy),
            in_trouble: BTreeMap::new(),
            failed_sites: BTreeSet::new(),
            safe_txn_ledger: BTreeMap::new(),
            forward_candidates: BTreeMap::new(),
        }
    }

    /// Handles a fault observation and returns the nodes to evict with their last safe
    /// transaction id.
    ///
    /// An empty map means there is nothing to decide yet: the observation was ignored, or the
    /// round was interrupted by a new fault which now sits at the front of the mailbox. The
    /// caller is expected to come back with that fault; it merges into the same round.
    pub fn reconfigure_on_fault(
        &mut self,
        membership: &BTreeSet<NodeId>,
        fault: FaultObservation,
    ) -> Result<BTreeMap<NodeId, i64>> {
        let mut proceed = self.screen(membership, fault);
        while let Some(message) = self.mailbox.recv(&[Subject::Failure])? {
            match message {
                MeshMessage::Fault(fault) => proceed = self.screen(membership, fault) || proceed,
                other => trace!("{} unexpected {} on the failure queue", "[arbiter]".cyan(), other),
            }
        }
        if !proceed {
            return Ok(BTreeMap::new());
        }

        let live = self.live(membership);
        self.seeker.start_seeking_for(&live, &self.in_trouble);
        self.broadcast(membership)?;

        if !self.gather(membership)? {
            return Ok(BTreeMap::new());
        }
        Ok(self.decide())
    }

    /// Handles a message received while no fault is being processed. Reports naming suspects
    /// this node does not know about open the round; everything else is late and dropped.
    pub fn on_idle_message(
        &mut self,
        membership: &BTreeSet<NodeId>,
        message: MeshMessage,
    ) -> Result<()> {
        let evidence = match message {
            MeshMessage::Report(report) => Evidence::Report(report),
            MeshMessage::Forward(forwarded) => Evidence::Forwarded(forwarded),
            other => {
                trace!("{} idle, dropping {}", "[arbiter]".cyan(), other);
                return Ok(());
            }
        };
        let report = evidence.report();
        if report.source == self.self_id
            || !membership.contains(&report.source)
            || self.failed_sites.contains(&report.source)
            || !report.failures.is_disjoint(&self.failed_sites)
            || self.unseen_suspects(membership, report).is_empty()
        {
            trace!("{} idle, dropping {}", "[arbiter]".cyan(), report);
            return Ok(());
        }
        let live = self.live(membership);
        self.seeker.start_seeking_for(&live, &self.in_trouble);
        let _ = self.ingest(membership, evidence)?;
        Ok(())
    }

    pub fn failed_sites(&self) -> &BTreeSet<NodeId> {
        &self.failed_sites
    }

    pub fn in_trouble(&self) -> &BTreeMap<NodeId, bool> {
        &self.in_trouble
    }

    pub fn mailbox(&self) -> &M {
        &self.mailbox
    }

    pub fn aide(&self) -> &A {
        &self.aide
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    fn classify(&self, membership: &BTreeSet<NodeId>, fault: &FaultObservation) -> Discard {
        let node = fault.faulting_node;
        if node == self.self_id && fault.witnessed {
            return Discard::SelfWitnessed;
        }
        if !membership.contains(&node) {
            return Discard::Unknown;
        }
        if self.failed_sites.contains(&node) {
            return Discard::AlreadyFailed;
        }
        match self.in_trouble.get(&node) {
            Some(witnessed) if *witnessed || !fault.witnessed => Discard::ReportedWitnessed,
            _ => Discard::DoNot,
        }
    }

    // Merges a processable fault into the round.
    fn screen(&mut self, membership: &BTreeSet<NodeId>, fault: FaultObservation) -> bool {
        let discard = self.classify(membership, &fault);
        if !discard.is_processable() {
            discard.log(&fault);
            return false;
        }
        info!("{} <- {}", "[arbiter]".cyan(), fault);
        let entry = self.in_trouble.entry(fault.faulting_node).or_insert(false);
        *entry = *entry || fault.witnessed;
        true
    }

    fn live(&self, membership: &BTreeSet<NodeId>) -> BTreeSet<NodeId> {
        membership.difference(&self.failed_sites).cloned().collect()
    }

    fn unseen_suspects(
        &self,
        membership: &BTreeSet<NodeId>,
        report: &SiteFailureReport,
    ) -> Vec<NodeId> {
        report
            .failures
            .iter()
            .filter(|id| membership.contains(*id))
            .filter(|id| !self.failed_sites.contains(*id) && !self.in_trouble.contains_key(*id))
            .cloned()
            .collect()
    }

    fn broadcast(&self, membership: &BTreeSet<NodeId>) -> Result<()> {
        let survivors = membership
            .iter()
            .filter(|id| !self.failed_sites.contains(*id))
            .filter(|id| !self.in_trouble.get(*id).cloned().unwrap_or(false))
            .cloned()
            .collect();
        let failures = self.in_trouble.keys().cloned().collect();
        let safe_txn_ids = self
            .in_trouble
            .keys()
            .map(|id| (*id, self.aide.newest_safe_transaction_for_initiator(*id)))
            .collect();
        let report = SiteFailureReport::new(self.self_id, survivors, failures, safe_txn_ids);
        info!(
            "{} {} -> {}",
            "[arbiter]".cyan(),
            report,
            ids_to_string(self.seeker.reporters())
        );
        self.mailbox.send_many(self.seeker.reporters(), MeshMessage::Report(report))?;
        Ok(())
    }

    // Runs the receive loop. `false` means the round was interrupted.
    fn gather(&mut self, membership: &BTreeSet<NodeId>) -> Result<bool> {
        let started = Instant::now();
        let mut last_stall_report: Option<Instant> = None;
        let mut have_enough = false;
        loop {
            let message = self.mailbox.recv_blocking(&SUBJECTS, self.config.receive_timeout)?;
            let ingested = match message {
                None => {
                    self.aide.send_heartbeats(self.seeker.expected_membership());
                    false
                }
                Some(MeshMessage::Report(report)) => {
                    if !self.accepts_report(&report) {
                        debug!("{} dropping {}", "[arbiter]".cyan(), report);
                        false
                    } else if self.ingest(membership, Evidence::Report(report))? {
                        return Ok(false);
                    } else {
                        true
                    }
                }
                Some(MeshMessage::Forward(forwarded)) => {
                    if !self.accepts_forward(membership, &forwarded) {
                        debug!("{} dropping {}", "[arbiter]".cyan(), forwarded);
                        false
                    } else if self.ingest(membership, Evidence::Forwarded(forwarded))? {
                        return Ok(false);
                    } else {
                        true
                    }
                }
                Some(MeshMessage::Fault(fault)) => {
                    let discard = self.classify(membership, &fault);
                    if discard.is_processable() {
                        info!("{} interrupted by {}", "[arbiter]".cyan(), fault);
                        self.mailbox.deliver_front(MeshMessage::Fault(fault))?;
                        return Ok(false);
                    }
                    discard.log(&fault);
                    false
                }
                Some(MeshMessage::Heartbeat(heartbeat)) => {
                    trace!("{} heartbeat from {}", "[arbiter]".cyan(), heartbeat.source);
                    false
                }
            };

            if ingested {
                have_enough = have_enough || self.seeker.have_enough();
                if have_enough {
                    self.forward_candidates()?;
                    if !self.seeker.need_forward() {
                        return Ok(true);
                    }
                }
            }
            self.report_stall(started, &mut last_stall_report);
        }
    }

    fn accepts_report(&self, report: &SiteFailureReport) -> bool {
        self.seeker.reporters().contains(&report.source)
            && !self.failed_sites.contains(&report.source)
            && report.failures.is_disjoint(&self.failed_sites)
    }

    // A forward is only useful for a source we cannot hear directly.
    fn accepts_forward(
        &self,
        membership: &BTreeSet<NodeId>,
        forwarded: &ForwardedReport,
    ) -> bool {
        let source = forwarded.inner.source;
        membership.contains(&source)
            && !self.seeker.reporters().contains(&source)
            && !self.failed_sites.contains(&source)
            && forwarded.inner.failures.is_disjoint(&self.failed_sites)
    }

    /// Adds evidence to the round. Returns `true` when it named suspects this node did not
    /// know about: relayed faults for them were queued and the round must be interrupted.
    fn ingest(&mut self, membership: &BTreeSet<NodeId>, evidence: Evidence) -> Result<bool> {
        let unseen = self.unseen_suspects(membership, evidence.report());
        let (source, survivors) = {
            let report = evidence.report();
            for (initiator, txn_id) in report.safe_txn_ids.iter() {
                let _ = self.safe_txn_ledger.insert((report.source, *initiator), *txn_id);
            }
            (report.source, report.survivors.clone())
        };
        debug!("{} <- {}", "[arbiter]".cyan(), evidence.report());
        if source != self.self_id {
            let inner = evidence.report().clone();
            let candidate = ForwardedReport { forwarded_by: self.self_id, inner };
            let _ = self.forward_candidates.insert(source, candidate);
        }
        self.seeker.add(evidence);

        if unseen.is_empty() {
            return Ok(false);
        }
        for id in unseen.into_iter() {
            info!("{} {} learned from {}", "[arbiter]".cyan(), id, source);
            let fault = FaultObservation::relayed(self.self_id, id, Some(survivors.clone()));
            self.mailbox.deliver_front(MeshMessage::Fault(fault))?;
        }
        Ok(true)
    }

    fn forward_candidates(&mut self) -> Result<()> {
        let candidates = std::mem::take(&mut self.forward_candidates);
        for (source, forwarded) in candidates.into_iter() {
            let targets = self.seeker.for_whom_site_is_dead(source);
            if targets.is_empty() {
                continue;
            }
            info!(
                "{} forwarding report of {} to {}",
                "[arbiter]".cyan(),
                source,
                ids_to_string(&targets)
            );
            self.mailbox.send_many(&targets, MeshMessage::Forward(forwarded))?;
        }
        Ok(())
    }

    fn report_stall(&self, started: Instant, last_report: &mut Option<Instant>) {
        let now = Instant::now();
        if now.duration_since(started) < self.config.stall_report_after {
            return;
        }
        if let Some(at) = last_report {
            if now.duration_since(*at) < self.config.stall_report_every {
                return;
            }
        }
        *last_report = Some(now);
        warn!(
            "{} round open for {}s, waiting on {}",
            "[arbiter]".cyan(),
            now.duration_since(started).as_secs(),
            ids_to_string(&self.seeker.missing_reporters())
        );
    }

    // Turns the seeker's kill list into a decision and closes the round when it is non-empty.
    fn decide(&mut self) -> BTreeMap<NodeId, i64> {
        let mut decision = BTreeMap::new();
        for node in self.seeker.next_kill().into_iter() {
            let mut safe_txn_id = self.aide.newest_safe_transaction_for_initiator(node);
            for reporter in self.seeker.reporters().iter() {
                if let Some(txn_id) = self.safe_txn_ledger.get(&(*reporter, node)) {
                    safe_txn_id = safe_txn_id.max(*txn_id);
                }
            }
            let _ = decision.insert(node, safe_txn_id);
        }
        if decision.is_empty() {
            return decision;
        }

        let spared = self
            .in_trouble
            .iter()
            .filter(|(id, witnessed)| **witnessed && !decision.contains_key(*id))
            .map(|(id, _)| *id)
            .collect::<Vec<NodeId>>();
        if !spared.is_empty() {
            warn!(
                "{} witnessed failures {} were not agreed on",
                "[arbiter]".cyan(),
                ids_to_string(&spared)
            );
        }

        self.failed_sites.extend(decision.keys().cloned());
        self.in_trouble.clear();
        self.seeker.clear();
        self.forward_candidates.clear();
        self.safe_txn_ledger.clear();
        info!(
            "{} decided {}",
            "[arbiter]".cyan(),
            decision
                .iter()
                .map(|(id, txn_id)| format!("{} (safe txn {})", id, txn_id))
                .collect::<Vec<String>>()
                .join(", ")
                .red()
        );
        decision
    }
}
