//! Driver of one cluster node: owns the live membership and feeds the mailbox to the arbiter.
use crate::agreement::{MeshAide, MeshArbiter};
use crate::colored::Colorize;
use crate::mailbox::Mailbox;
use crate::message::{MeshMessage, Subject};
use crate::node_id::{ids_to_string, NodeId};
use crate::view::Evicted;
use crate::Result;

use actix::Recipient;
use tracing::{info, warn};

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Wait of one idle receive.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// Consumer of eviction decisions, usually the membership manager.
pub trait DisconnectHandler {
    fn on_disconnect(&mut self, decision: &BTreeMap<NodeId, i64>);
}

impl DisconnectHandler for Box<dyn FnMut(&BTreeMap<NodeId, i64>) + Send> {
    fn on_disconnect(&mut self, decision: &BTreeMap<NodeId, i64>) {
        (self)(decision)
    }
}

impl DisconnectHandler for Recipient<Evicted> {
    fn on_disconnect(&mut self, decision: &BTreeMap<NodeId, i64>) {
        if let Err(err) = self.do_send(Evicted { decision: decision.clone() }) {
            warn!(
                "{} eviction of {} not handed over: {}",
                "[node]".green(),
                ids_to_string(decision.keys()),
                err
            );
        }
    }
}

impl<H: DisconnectHandler> DisconnectHandler for Option<H> {
    fn on_disconnect(&mut self, decision: &BTreeMap<NodeId, i64>) {
        if let Some(handler) = self {
            handler.on_disconnect(decision)
        }
    }
}

pub struct MeshNode<M, A, H> {
    membership: BTreeSet<NodeId>,
    arbiter: MeshArbiter<M, A>,
    handler: H,
}

impl<M: Mailbox, A: MeshAide, H: DisconnectHandler> MeshNode<M, A, H> {
    pub fn new(membership: BTreeSet<NodeId>, arbiter: MeshArbiter<M, A>, handler: H) -> Self {
        MeshNode { membership, arbiter, handler }
    }

    pub fn id(&self) -> NodeId {
        self.arbiter.mailbox().id()
    }

    pub fn membership(&self) -> &BTreeSet<NodeId> {
        &self.membership
    }

    pub fn arbiter(&self) -> &MeshArbiter<M, A> {
        &self.arbiter
    }

    /// Waits once for a message and handles it. Returns the decision when a round was resolved.
    pub fn step(&mut self) -> Result<Option<BTreeMap<NodeId, i64>>> {
        let subjects = [Subject::Failure, Subject::Default];
        let message = self.arbiter.mailbox().recv_blocking(&subjects, IDLE_WAIT)?;
        match message {
            None => Ok(None),
            Some(MeshMessage::Fault(fault)) => {
                let decision = self.arbiter.reconfigure_on_fault(&self.membership, fault)?;
                if decision.is_empty() {
                    return Ok(None);
                }
                for id in decision.keys() {
                    let _ = self.membership.remove(id);
                }
                info!(
                    "{} {} evicts {}, members {}",
                    "[node]".green(),
                    self.id(),
                    ids_to_string(decision.keys()),
                    ids_to_string(&self.membership)
                );
                self.handler.on_disconnect(&decision);
                Ok(Some(decision))
            }
            Some(other) => {
                self.arbiter.on_idle_message(&self.membership, other)?;
                Ok(None)
            }
        }
    }

    /// Steps until the first eviction decision.
    pub fn run_until_resolved(&mut self) -> Result<BTreeMap<NodeId, i64>> {
        loop {
            if let Some(decision) = self.step()? {
                return Ok(decision);
            }
        }
    }

    /// Steps until the mailbox fails.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let _ = self.step()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::agreement::ArbiterConfig;
    use crate::mailbox::{self, LocalMailbox};
    use crate::message::{FaultObservation, Heartbeat};
    use crate::sim::{InMemoryMesh, SimAide};

    use parking_lot::Mutex;

    use std::sync::Arc;

    type Handler = Box<dyn FnMut(&BTreeMap<NodeId, i64>) + Send>;

    fn node(
        mesh: &Arc<InMemoryMesh>,
        mailbox: LocalMailbox,
        seen: Arc<Mutex<Vec<BTreeMap<NodeId, i64>>>>,
    ) -> MeshNode<LocalMailbox, SimAide, Handler> {
        let id = mailbox.id();
        let membership = vec![NodeId::new(0), NodeId::new(1)].into_iter().collect();
        let safe_txn_ids = Arc::new(parking_lot::RwLock::new(BTreeMap::new()));
        safe_txn_ids.write().insert(NodeId::new(1), 21i64);
        let aide = SimAide::new(id, safe_txn_ids, mesh.clone());
        let arbiter = MeshArbiter::new(id, mailbox, aide, ArbiterConfig::default());
        let handler: Handler = Box::new(move |decision: &BTreeMap<NodeId, i64>| {
            seen.lock().push(decision.clone())
        });
        MeshNode::new(membership, arbiter, handler)
    }

    #[test]
    fn test_lone_survivor_resolves() {
        let mesh = InMemoryMesh::new();
        let mailbox = mesh.join(NodeId::new(0));
        let _peer = mesh.join(NodeId::new(1));
        let seen = Arc::new(Mutex::new(vec![]));
        let mut node = node(&mesh, mailbox, seen.clone());

        // idle traffic is dropped
        let heartbeat = Heartbeat { source: NodeId::new(1), last_safe_txn_id: 3 };
        mesh.inject(NodeId::new(0), MeshMessage::Heartbeat(heartbeat));
        assert_eq!(node.step().unwrap(), None);

        mesh.kill(NodeId::new(1));
        let decision = node.run_until_resolved().unwrap();

        let mut expected = BTreeMap::new();
        expected.insert(NodeId::new(1), 21);
        assert_eq!(decision, expected);
        assert_eq!(node.membership(), &vec![NodeId::new(0)].into_iter().collect());
        assert_eq!(*seen.lock(), vec![expected]);
    }

    #[actix_rt::test]
    async fn test_decisions_reach_the_view() {
        use crate::view::{GetMembers, MembershipView};
        use actix::Actor;

        let members: BTreeSet<NodeId> = vec![NodeId::new(0), NodeId::new(1)].into_iter().collect();
        let view_addr = MembershipView::new(NodeId::new(0), members).start();
        let mut handler = Some(view_addr.clone().recipient::<Evicted>());
        let mut decision = BTreeMap::new();
        decision.insert(NodeId::new(1), 4);
        handler.on_disconnect(&decision);

        let mut absent: Option<Recipient<Evicted>> = None;
        absent.on_disconnect(&decision);

        let view = view_addr.send(GetMembers).await.unwrap();
        assert_eq!(view.members, vec![NodeId::new(0)].into_iter().collect::<BTreeSet<_>>());
        assert_eq!(view.evicted, decision);
    }

    #[test]
    fn test_run_stops_on_mailbox_failure() {
        let mesh = InMemoryMesh::new();
        let mailbox = mesh.join(NodeId::new(0));
        let _peer = mesh.join(NodeId::new(1));
        let mut node = node(&mesh, mailbox, Arc::new(Mutex::new(vec![])));

        mesh.inject(
            NodeId::new(0),
            MeshMessage::Fault(FaultObservation::witnessed(NodeId::new(0), NodeId::new(7))),
        );
        mesh.close_all();
        match node.run() {
            Err(crate::Error::Mailbox(mailbox::Error::Closed)) => (),
            other => panic!("unexpected run result: {:?}", other),
        }
    }
}
