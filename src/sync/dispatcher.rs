//! Coalescence dispatcher: the event hot path.
//!
//! `handle` never blocks on the remote. It fans the event out into intents
//! and hands each one to the supervisor as its own task; the existence
//! guard and the fetches run there.

use super::events::DirectoryEvent;
use super::intents::fan_out;
use super::operations::SyncOperations;
use super::supervisor::TaskSupervisor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct CoalescenceDispatcher {
    operations: Arc<SyncOperations>,
    supervisor: TaskSupervisor,
    shutdown: CancellationToken,
}

impl CoalescenceDispatcher {
    pub fn new(
        operations: Arc<SyncOperations>,
        supervisor: TaskSupervisor,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            operations,
            supervisor,
            shutdown,
        }
    }

    /// Launch one supervised task per intent. Returns how many were launched.
    pub fn handle(&self, event: &DirectoryEvent) -> usize {
        let intents = fan_out(event);
        tracing::trace!(event = event.name(), intents = intents.len(), "Dispatching event");

        let mut launched = 0;
        for intent in intents {
            let operations = Arc::clone(&self.operations);
            let cancel = self.shutdown.clone();
            let label = intent.label();
            if self
                .supervisor
                .spawn(label, async move { operations.run_intent(intent, &cancel).await })
            {
                launched += 1;
            }
        }
        launched
    }
}
