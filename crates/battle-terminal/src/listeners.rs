//! Listener registry: (target handle, event, callback) triples with tracked removal

use std::sync::Arc;

use crate::backend::ExitStatus;

/// Identifies one allocated PTY handle within a lifecycle
pub type HandleId = u64;

/// Identifies one registration
pub type ListenerId = u64;

pub type DataListener = Arc<dyn Fn(&[u8]) + Send + Sync>;
pub type ExitListener = Arc<dyn Fn(&ExitStatus) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerEvent {
    Data,
    Exit,
}

#[derive(Clone)]
enum Callback {
    Data(DataListener),
    Exit(ExitListener),
}

impl Callback {
    fn event(&self) -> ListenerEvent {
        match self {
            Self::Data(_) => ListenerEvent::Data,
            Self::Exit(_) => ListenerEvent::Exit,
        }
    }
}

struct Registration {
    id: ListenerId,
    target: HandleId,
    callback: Callback,
}

/// Every callback attached to any handle, removable individually or per handle
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Vec<Registration>,
    next_id: ListenerId,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_data(&mut self, target: HandleId, callback: DataListener) -> ListenerId {
        self.register(target, Callback::Data(callback))
    }

    pub fn on_exit(&mut self, target: HandleId, callback: ExitListener) -> ListenerId {
        self.register(target, Callback::Exit(callback))
    }

    fn register(&mut self, target: HandleId, callback: Callback) -> ListenerId {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(Registration {
            id,
            target,
            callback,
        });
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.id != id);
        self.entries.len() != before
    }

    /// Remove every listener bound to `target`; returns how many were removed
    pub fn detach(&mut self, target: HandleId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| r.target != target);
        before - self.entries.len()
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, target: HandleId, event: ListenerEvent) -> usize {
        self.entries
            .iter()
            .filter(|r| r.target == target && r.callback.event() == event)
            .count()
    }

    /// Data callbacks for `target`, cloned so they can run without the registry lock
    pub fn data_listeners(&self, target: HandleId) -> Vec<DataListener> {
        self.entries
            .iter()
            .filter(|r| r.target == target)
            .filter_map(|r| match &r.callback {
                Callback::Data(cb) => Some(Arc::clone(cb)),
                Callback::Exit(_) => None,
            })
            .collect()
    }

    pub fn exit_listeners(&self, target: HandleId) -> Vec<ExitListener> {
        self.entries
            .iter()
            .filter(|r| r.target == target)
            .filter_map(|r| match &r.callback {
                Callback::Exit(cb) => Some(Arc::clone(cb)),
                Callback::Data(_) => None,
            })
            .collect()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.entries.len())
            .finish()
    }
}
