use crate::model::{Entity, EntitySet};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// An instance was added to the modified or removed set
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub entity: Entity,
}

/// Published before a commit with snapshots of the pending changes
#[derive(Debug, Clone)]
pub struct PreCommitEvent {
    pub modified: Vec<Entity>,
    pub removed: Vec<Entity>,
}

/// Published after a commit with the authoritative committed instances
#[derive(Debug, Clone)]
pub struct PostCommitEvent {
    pub committed: EntitySet,
}

/// Answer of a pre-commit subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    Proceed,
    Prevent,
}

type ChangeHandler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
type PreCommitHandler = Arc<dyn Fn(&PreCommitEvent) -> CommitDecision + Send + Sync>;
type PostCommitHandler = Arc<dyn Fn(&PostCommitEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    change: Vec<(u64, ChangeHandler)>,
    pre_commit: Vec<(u64, PreCommitHandler)>,
    post_commit: Vec<(u64, PostCommitHandler)>,
}

impl Subscribers {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, id: u64) {
        self.change.retain(|(i, _)| *i != id);
        self.pre_commit.retain(|(i, _)| *i != id);
        self.post_commit.retain(|(i, _)| *i != id);
    }
}

/// Ordered subscriber lists for the context's events.
///
/// Handlers run in subscription order, outside of the hub's lock.
#[derive(Default)]
pub struct EventHub {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_change(&self, handler: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Subscription {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id();
        subscribers.change.push((id, Arc::new(handler)));
        self.subscription(id)
    }

    pub fn subscribe_pre_commit(
        &self,
        handler: impl Fn(&PreCommitEvent) -> CommitDecision + Send + Sync + 'static,
    ) -> Subscription {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id();
        subscribers.pre_commit.push((id, Arc::new(handler)));
        self.subscription(id)
    }

    pub fn subscribe_post_commit(
        &self,
        handler: impl Fn(&PostCommitEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id();
        subscribers.post_commit.push((id, Arc::new(handler)));
        self.subscription(id)
    }

    fn subscription(&self, id: u64) -> Subscription {
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    pub fn publish_change(&self, event: &ChangeEvent) {
        let handlers: Vec<ChangeHandler> = self
            .subscribers
            .lock()
            .change
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Run pre-commit handlers in order; the first `Prevent` stops the chain
    pub fn publish_pre_commit(&self, event: &PreCommitEvent) -> CommitDecision {
        let handlers: Vec<PreCommitHandler> = self
            .subscribers
            .lock()
            .pre_commit
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            if handler(event) == CommitDecision::Prevent {
                return CommitDecision::Prevent;
            }
        }
        CommitDecision::Proceed
    }

    pub fn publish_post_commit(&self, event: &PostCommitEvent) {
        let handlers: Vec<PostCommitHandler> = self
            .subscribers
            .lock()
            .post_commit
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

/// Handle returned by every subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("change", &self.change.len())
            .field("pre_commit", &self.pre_commit.len())
            .field("post_commit", &self.post_commit.len())
            .finish()
    }
}
