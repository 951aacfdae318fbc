use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Connectivity {
    Online,
    Offline,
}

/// The process-wide view of whether the network is up, shared by the resolver and the coordinator.
#[derive(Clone, Debug)]
pub struct NetworkStatus {
    sender: Arc<watch::Sender<Connectivity>>,
}

impl NetworkStatus {
    pub fn new(initial: Connectivity) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn current(&self) -> Connectivity {
        *self.sender.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current() == Connectivity::Online
    }

    /// Record a connectivity edge. Returns whether the state actually changed.
    pub fn set(&self, connectivity: Connectivity) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == connectivity {
                return false;
            }
            *current = connectivity;
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.sender.subscribe()
    }
}
