//! Point to point delivery of [MeshMessage]s between nodes.
//!
//! The agreement protocol only ever talks to a [Mailbox]. A [LocalMailbox] is the in-process
//! implementation: an [Inbox] of per-subject queues for incoming traffic, and a [PostOffice] for
//! everything addressed to other nodes.
use crate::message::{MeshMessage, Subject};
use crate::node_id::NodeId;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The mailbox was shut down and will never deliver again.
    Closed,
    /// The post office does not know the destination.
    UnknownDestination(NodeId),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A node's view of the network.
pub trait Mailbox {
    /// The node owning this mailbox.
    fn id(&self) -> NodeId;

    fn send(&self, target: NodeId, message: MeshMessage) -> Result<()>;

    fn send_many(&self, targets: &BTreeSet<NodeId>, message: MeshMessage) -> Result<()> {
        for target in targets.iter() {
            self.send(*target, message.clone())?;
        }
        Ok(())
    }

    /// Queues a message for the local node, behind everything of the same subject.
    fn deliver(&self, message: MeshMessage) -> Result<()>;

    /// Queues a message for the local node, ahead of everything of the same subject.
    fn deliver_front(&self, message: MeshMessage) -> Result<()>;

    /// Takes the first queued message of the first non-empty subject, without waiting.
    fn recv(&self, subjects: &[Subject]) -> Result<Option<MeshMessage>>;

    /// Like `recv` but waits up to `timeout` for a message to arrive.
    fn recv_blocking(&self, subjects: &[Subject], timeout: Duration)
        -> Result<Option<MeshMessage>>;
}

/// Outbound path of a [LocalMailbox].
pub trait PostOffice: Send + Sync {
    fn post(&self, from: NodeId, to: NodeId, message: MeshMessage) -> Result<()>;
}

#[derive(Default)]
struct Queues {
    by_subject: BTreeMap<Subject, VecDeque<MeshMessage>>,
    closed: bool,
}

impl Queues {
    fn take(&mut self, subjects: &[Subject]) -> Option<MeshMessage> {
        for subject in subjects.iter() {
            if let Some(queue) = self.by_subject.get_mut(subject) {
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
            }
        }
        None
    }
}

/// Incoming queues of one node, safe to share between the owner and any number of senders.
#[derive(Default)]
pub struct Inbox {
    queues: Mutex<Queues>,
    ready: Condvar,
}

impl Inbox {
    pub fn new() -> Inbox {
        Inbox::default()
    }

    pub fn push_back(&self, message: MeshMessage) {
        let mut queues = self.queues.lock();
        if queues.closed {
            trace!("inbox closed, dropping {}", message);
            return;
        }
        queues.by_subject.entry(message.subject()).or_default().push_back(message);
        let _ = self.ready.notify_all();
    }

    pub fn push_front(&self, message: MeshMessage) {
        let mut queues = self.queues.lock();
        if queues.closed {
            trace!("inbox closed, dropping {}", message);
            return;
        }
        queues.by_subject.entry(message.subject()).or_default().push_front(message);
        let _ = self.ready.notify_all();
    }

    pub fn pop(&self, subjects: &[Subject]) -> Result<Option<MeshMessage>> {
        let mut queues = self.queues.lock();
        if queues.closed {
            return Err(Error::Closed);
        }
        Ok(queues.take(subjects))
    }

    pub fn pop_timeout(
        &self,
        subjects: &[Subject],
        timeout: Duration,
    ) -> Result<Option<MeshMessage>> {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock();
        loop {
            if queues.closed {
                return Err(Error::Closed);
            }
            if let Some(message) = queues.take(subjects) {
                return Ok(Some(message));
            }
            if self.ready.wait_until(&mut queues, deadline).timed_out() {
                if queues.closed {
                    return Err(Error::Closed);
                }
                return Ok(queues.take(subjects));
            }
        }
    }

    /// Shuts the inbox down, waking every waiter. Queued messages are discarded.
    pub fn close(&self) {
        let mut queues = self.queues.lock();
        queues.closed = true;
        queues.by_subject.clear();
        let _ = self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.queues.lock().closed
    }

    pub fn len(&self) -> usize {
        self.queues.lock().by_subject.values().map(|queue| queue.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process mailbox backed by a shared [Inbox].
#[derive(Clone)]
pub struct LocalMailbox {
    id: NodeId,
    inbox: Arc<Inbox>,
    post_office: Arc<dyn PostOffice>,
}

impl LocalMailbox {
    pub fn new(id: NodeId, inbox: Arc<Inbox>, post_office: Arc<dyn PostOffice>) -> LocalMailbox {
        LocalMailbox { id, inbox, post_office }
    }

    pub fn inbox(&self) -> Arc<Inbox> {
        self.inbox.clone()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inbox.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Mailbox for LocalMailbox {
    fn id(&self) -> NodeId {
        self.id
    }

    fn send(&self, target: NodeId, message: MeshMessage) -> Result<()> {
        self.ensure_open()?;
        if target == self.id {
            self.inbox.push_back(message);
            Ok(())
        } else {
            self.post_office.post(self.id, target, message)
        }
    }

    fn deliver(&self, message: MeshMessage) -> Result<()> {
        self.ensure_open()?;
        self.inbox.push_back(message);
        Ok(())
    }

    fn deliver_front(&self, message: MeshMessage) -> Result<()> {
        self.ensure_open()?;
        self.inbox.push_front(message);
        Ok(())
    }

    fn recv(&self, subjects: &[Subject]) -> Result<Option<MeshMessage>> {
        self.inbox.pop(subjects)
    }

    fn recv_blocking(
        &self,
        subjects: &[Subject],
        timeout: Duration,
    ) -> Result<Option<MeshMessage>> {
        self.inbox.pop_timeout(subjects, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::message::{FaultObservation, Heartbeat};

    use std::thread;

    struct Letters {
        posted: Mutex<Vec<(NodeId, NodeId, MeshMessage)>>,
    }

    impl PostOffice for Letters {
        fn post(&self, from: NodeId, to: NodeId, message: MeshMessage) -> Result<()> {
            if to == NodeId::new(99) {
                return Err(Error::UnknownDestination(to));
            }
            self.posted.lock().push((from, to, message));
            Ok(())
        }
    }

    fn heartbeat(source: u64) -> MeshMessage {
        MeshMessage::Heartbeat(Heartbeat { source: NodeId::new(source), last_safe_txn_id: 0 })
    }

    fn fault(node: u64) -> MeshMessage {
        MeshMessage::Fault(FaultObservation::witnessed(NodeId::new(1), NodeId::new(node)))
    }

    fn mailbox() -> (LocalMailbox, Arc<Letters>) {
        let letters = Arc::new(Letters { posted: Mutex::new(vec![]) });
        let mailbox = LocalMailbox::new(NodeId::new(1), Arc::new(Inbox::new()), letters.clone());
        (mailbox, letters)
    }

    #[test]
    fn test_subjects_are_scanned_in_order() {
        let inbox = Inbox::new();
        inbox.push_back(heartbeat(2));
        inbox.push_back(fault(3));

        let both = [Subject::Failure, Subject::Default];
        assert_eq!(inbox.pop(&both).unwrap(), Some(fault(3)));
        assert_eq!(inbox.pop(&[Subject::Failure]).unwrap(), None);
        assert_eq!(inbox.pop(&both).unwrap(), Some(heartbeat(2)));
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_push_front_jumps_the_queue() {
        let inbox = Inbox::new();
        inbox.push_back(heartbeat(2));
        inbox.push_back(heartbeat(3));
        inbox.push_front(heartbeat(4));

        let default = [Subject::Default];
        assert_eq!(inbox.pop(&default).unwrap(), Some(heartbeat(4)));
        assert_eq!(inbox.pop(&default).unwrap(), Some(heartbeat(2)));
        assert_eq!(inbox.pop(&default).unwrap(), Some(heartbeat(3)));
    }

    #[test]
    fn test_pop_timeout_expires() {
        let inbox = Inbox::new();
        let got = inbox.pop_timeout(&[Subject::Default], Duration::from_millis(5)).unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let inbox = Arc::new(Inbox::new());
        let sender = inbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sender.push_back(heartbeat(2));
        });
        let got = inbox.pop_timeout(&[Subject::Default], Duration::from_secs(5)).unwrap();
        assert_eq!(got, Some(heartbeat(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_close_wakes_waiters() {
        let inbox = Arc::new(Inbox::new());
        let closer = inbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        let got = inbox.pop_timeout(&[Subject::Default], Duration::from_secs(5));
        assert_eq!(got, Err(Error::Closed));
        handle.join().unwrap();

        inbox.push_back(heartbeat(2));
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_local_mailbox_routing() {
        let (mailbox, letters) = mailbox();
        mailbox.send(NodeId::new(1), heartbeat(1)).unwrap();
        let targets = vec![NodeId::new(2), NodeId::new(3)].into_iter().collect();
        mailbox.send_many(&targets, heartbeat(1)).unwrap();

        assert_eq!(mailbox.recv(&[Subject::Default]).unwrap(), Some(heartbeat(1)));
        let posted = letters.posted.lock();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].0, NodeId::new(1));
        assert_eq!(posted[0].1, NodeId::new(2));
        assert_eq!(posted[1].1, NodeId::new(3));
    }

    #[test]
    fn test_local_mailbox_errors() {
        let (mailbox, _letters) = mailbox();
        assert_eq!(
            mailbox.send(NodeId::new(99), heartbeat(1)),
            Err(Error::UnknownDestination(NodeId::new(99)))
        );

        mailbox.inbox().close();
        assert_eq!(mailbox.send(NodeId::new(2), heartbeat(1)), Err(Error::Closed));
        assert_eq!(mailbox.deliver_front(fault(2)), Err(Error::Closed));
        assert_eq!(mailbox.recv(&[Subject::Failure]), Err(Error::Closed));
    }
}
