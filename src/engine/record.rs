use crate::engine::index::{GroupHandle, NodeId};
use crate::engine::pubsub::PubSub;

/// One record's attachment to an indexed column: the handle of its node in
/// that column's index arena, and the handle of the publish group bound to
/// its current value for that column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    pub node: Option<NodeId>,
    pub group: Option<GroupHandle>,
}

/// A table row.
///
/// Values are indexed by column ordinal; a record's identity is its
/// position in the table's record list and never changes. `links` has one
/// slot per indexed column. `watchers` holds the subscriptions bound
/// directly to this record by id-scoped subscribes.
#[derive(Debug, Default)]
pub struct Record {
    values: Vec<String>,
    pub links: Vec<Link>,
    pub watchers: PubSub,
}

impl Record {
    pub fn new(width: usize, slots: usize) -> Self {
        Self {
            values: vec![String::new(); width],
            links: vec![Link::default(); slots],
            watchers: PubSub::default(),
        }
    }

    /// Value at `ordinal`; columns added after this record was created
    /// read as empty.
    pub fn get(&self, ordinal: usize) -> &str {
        self.values.get(ordinal).map_or("", String::as_str)
    }

    /// Sets the value at `ordinal`, growing the value array if the schema
    /// has grown since this record was created.
    pub fn set(&mut self, ordinal: usize, val: String) {
        if ordinal >= self.values.len() {
            self.values.resize(ordinal + 1, String::new());
        }
        self.values[ordinal] = val;
    }

    /// Makes sure a link slot exists for a column indexed after this
    /// record was created.
    pub fn ensure_slot(&mut self, slot: usize) {
        if slot >= self.links.len() {
            self.links.resize(slot + 1, Link::default());
        }
    }
}
