use crate::agreement::{ArbiterConfig, MeshArbiter};
use crate::colored::Colorize;
use crate::mailbox::LocalMailbox;
use crate::node::{DisconnectHandler, MeshNode};
use crate::node_id::{ids_to_string, NodeId};
use crate::{Error, Result};

use super::aide::{SafeTxnTable, SimAide};
use super::mesh::InMemoryMesh;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{info, warn};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub type Decision = BTreeMap<NodeId, i64>;

/// A whole cluster running in one process, one thread per node.
pub struct SimCluster {
    config: ArbiterConfig,
    mesh: Arc<InMemoryMesh>,
    mailboxes: BTreeMap<NodeId, LocalMailbox>,
    safe_txn_ids: SafeTxnTable,
    killed: BTreeSet<NodeId>,
}

impl SimCluster {
    pub fn new<I: IntoIterator<Item = NodeId>>(ids: I, config: ArbiterConfig) -> SimCluster {
        let mesh = InMemoryMesh::new();
        let mailboxes = ids.into_iter().map(|id| (id, mesh.join(id))).collect();
        SimCluster {
            config,
            mesh,
            mailboxes,
            safe_txn_ids: Arc::new(RwLock::new(BTreeMap::new())),
            killed: BTreeSet::new(),
        }
    }

    pub fn membership(&self) -> BTreeSet<NodeId> {
        self.mailboxes.keys().cloned().collect()
    }

    pub fn survivors(&self) -> BTreeSet<NodeId> {
        self.mailboxes.keys().filter(|id| !self.killed.contains(*id)).cloned().collect()
    }

    pub fn mesh(&self) -> &Arc<InMemoryMesh> {
        &self.mesh
    }

    pub fn set_safe_txn_id(&self, initiator: NodeId, txn_id: i64) {
        let _ = self.safe_txn_ids.write().insert(initiator, txn_id);
    }

    pub fn safe_txn_id(&self, initiator: NodeId) -> i64 {
        self.safe_txn_ids.read().get(&initiator).cloned().unwrap_or(0)
    }

    pub fn kill(&mut self, id: NodeId) {
        let _ = self.killed.insert(id);
        self.mesh.kill(id);
    }

    pub fn sever(&self, a: NodeId, b: NodeId) {
        self.mesh.sever(a, b);
    }

    /// Runs every surviving node until its first decision, giving up after `deadline`.
    pub fn resolve(&self, deadline: Duration) -> BTreeMap<NodeId, Result<Decision>> {
        self.resolve_with(deadline, |_| -> Box<dyn FnMut(&Decision) + Send> { Box::new(|_| ()) })
    }

    /// Like `resolve`, handing every decision to the handler built for its node.
    pub fn resolve_with<H, F>(
        &self,
        deadline: Duration,
        mut make_handler: F,
    ) -> BTreeMap<NodeId, Result<Decision>>
    where
        H: DisconnectHandler + Send + 'static,
        F: FnMut(NodeId) -> H,
    {
        let membership = self.membership();
        info!(
            "{} resolving {}, killed {}",
            "[sim]".yellow(),
            ids_to_string(&membership),
            ids_to_string(&self.killed)
        );

        let mut handles = vec![];
        for id in self.survivors().into_iter() {
            let mailbox = match self.mailboxes.get(&id) {
                Some(mailbox) => mailbox.clone(),
                None => continue,
            };
            let aide = SimAide::new(id, self.safe_txn_ids.clone(), self.mesh.clone());
            let arbiter = MeshArbiter::new(id, mailbox, aide, self.config);
            let mut node = MeshNode::new(membership.clone(), arbiter, make_handler(id));
            handles.push((id, thread::spawn(move || node.run_until_resolved())));
        }

        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let watchdog = {
            let done = done.clone();
            let mesh = self.mesh.clone();
            thread::spawn(move || {
                let (finished, wakeup) = &*done;
                let until = Instant::now() + deadline;
                let mut finished = finished.lock();
                while !*finished {
                    if wakeup.wait_until(&mut finished, until).timed_out() {
                        break;
                    }
                }
                if !*finished {
                    warn!("{} deadline expired, closing every mailbox", "[sim]".yellow());
                    mesh.close_all();
                }
            })
        };

        let mut results = BTreeMap::new();
        for (id, handle) in handles.into_iter() {
            let result = handle.join().unwrap_or_else(|_| Err(Error::JoinError));
            match &result {
                Ok(decision) => {
                    info!("{} {} decided {:?}", "[sim]".yellow(), id, decision)
                }
                Err(err) => warn!("{} {} failed: {}", "[sim]".yellow(), id, err),
            }
            let _ = results.insert(id, result);
        }

        {
            let (finished, wakeup) = &*done;
            *finished.lock() = true;
            let _ = wakeup.notify_all();
        }
        let _ = watchdog.join();
        results
    }
}
