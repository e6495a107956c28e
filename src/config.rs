use std::time::Duration;

/// Engine and network tunables.
///
/// Every queue in the data path is bounded; these capacities are the knobs
/// that bound memory under slow or stalled clients. Defaults match the
/// sizes the server has been run with in production.
#[derive(Debug, Clone)]
pub struct Config {
    /// Rows per wire chunk when paginating large result sets.
    pub data_batch_size: usize,
    /// Capacity of each connection's outbound response mailbox. A full
    /// mailbox is fatal to that connection only.
    pub response_mailbox_capacity: usize,
    /// Capacity of each table actor's inbound request queue.
    pub table_mailbox_capacity: usize,
    /// Capacity of the dispatcher's inbound request queue.
    pub dispatcher_mailbox_capacity: usize,
    /// Capacity of the control loop's queue (status/stop commands).
    pub control_mailbox_capacity: usize,
    /// How long shutdown waits for joined workers to drain.
    pub shutdown_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_batch_size: 100,
            response_mailbox_capacity: 10_000,
            table_mailbox_capacity: 1_000,
            dispatcher_mailbox_capacity: 1_000,
            control_mailbox_capacity: 100,
            shutdown_wait: Duration::from_secs(3),
        }
    }
}
