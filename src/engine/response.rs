//! Outgoing response model.
//!
//! Responses are transient, one per outgoing message or pub/sub event.
//! Every variant knows how to serialize itself into a JSON frame body;
//! row-carrying variants paginate themselves into batch-sized chunks
//! across repeated serialization calls, and pub/sub events can merge with
//! a queued same-kind, same-subscription successor so a burst of
//! notifications collapses into one wire message.

use serde_json::{Map, Value, json};

/// A projected column: its display name and its ordinal in the source
/// table, the latter used only to decide whether two responses project the
/// same columns and may merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub name: String,
    pub ordinal: usize,
}

/// A projected set of rows plus pagination state.
///
/// When `columns` is empty the set reports only a row count: mutations
/// without a `returning` clause answer "N rows affected" with no data
/// body. Otherwise serialization emits `columns`, `rows`, `fromrow`,
/// `torow` and `data`, slicing at most `batch` rows per call and
/// reporting whether more chunks follow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowSet {
    pub columns: Vec<ColumnRef>,
    pub rows: Vec<Vec<String>>,
    count: usize,
    started: bool,
    total: usize,
    fromrow: usize,
    torow: usize,
    cursor: usize,
}

impl RowSet {
    /// Row-count-only set (no columns requested).
    pub fn counted(count: usize) -> Self {
        Self {
            count,
            ..Self::default()
        }
    }

    /// Data-carrying set.
    pub fn projected(columns: Vec<ColumnRef>, rows: Vec<Vec<String>>) -> Self {
        Self {
            columns,
            rows,
            ..Self::default()
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Writes the next chunk into `obj`. Returns true while more chunks
    /// remain. `pubsub` renumbers each chunk's window to `1..rows`, since
    /// an event chunk is self-contained rather than a slice of a reply.
    fn write(&mut self, obj: &mut Map<String, Value>, batch: usize, pubsub: bool) -> bool {
        if self.columns.is_empty() {
            obj.insert("rows".into(), json!(self.count));
            return false;
        }
        obj.insert(
            "columns".into(),
            Value::Array(self.columns.iter().map(|c| json!(c.name)).collect()),
        );
        if !self.started {
            self.started = true;
            self.total = self.rows.len();
            self.fromrow = 0;
            self.torow = 0;
            self.cursor = 0;
        }
        let remaining = self.total - self.cursor;
        let more = remaining > batch;
        let take = if more { batch } else { remaining };
        if more {
            self.fromrow = self.torow + 1;
            self.torow = self.fromrow + batch - 1;
        } else if self.total > 0 {
            self.fromrow = self.torow + 1;
            self.torow = self.total;
        }
        let (mut rows, mut fromrow, mut torow) = (self.total, self.fromrow, self.torow);
        if pubsub && fromrow > 0 {
            rows = torow - fromrow + 1;
            torow = rows;
            fromrow = 1;
        }
        obj.insert("rows".into(), json!(rows));
        obj.insert("fromrow".into(), json!(fromrow));
        obj.insert("torow".into(), json!(torow));
        let chunk = &self.rows[self.cursor..self.cursor + take];
        self.cursor += take;
        obj.insert(
            "data".into(),
            Value::Array(
                chunk
                    .iter()
                    .map(|row| Value::Array(row.iter().map(|v| json!(v)).collect()))
                    .collect(),
            ),
        );
        more
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    Error {
        msg: String,
    },
    Ok {
        action: &'static str,
    },
    Status {
        connections: usize,
    },
    /// Reply to insert/select/update/delete (and push/pop/peek).
    Data {
        action: &'static str,
        rows: RowSet,
    },
    /// Subscribe acknowledgment.
    Subscribed {
        pubsubid: u64,
    },
    Unsubscribed {
        count: usize,
    },
    /// Server-initiated pub/sub event: add, insert, update, delete or
    /// remove. Always carried with request id 0.
    Event {
        action: &'static str,
        pubsubid: u64,
        rows: RowSet,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub request_id: u32,
    pub body: Body,
}

impl Response {
    pub fn error(request_id: u32, msg: impl Into<String>) -> Self {
        Self {
            request_id,
            body: Body::Error { msg: msg.into() },
        }
    }

    pub fn ok(request_id: u32, action: &'static str) -> Self {
        Self {
            request_id,
            body: Body::Ok { action },
        }
    }

    pub fn status(request_id: u32, connections: usize) -> Self {
        Self {
            request_id,
            body: Body::Status { connections },
        }
    }

    pub fn data(request_id: u32, action: &'static str, rows: RowSet) -> Self {
        Self {
            request_id,
            body: Body::Data { action, rows },
        }
    }

    pub fn subscribed(request_id: u32, pubsubid: u64) -> Self {
        Self {
            request_id,
            body: Body::Subscribed { pubsubid },
        }
    }

    pub fn unsubscribed(request_id: u32, count: usize) -> Self {
        Self {
            request_id,
            body: Body::Unsubscribed { count },
        }
    }

    pub fn event(action: &'static str, pubsubid: u64, rows: RowSet) -> Self {
        Self {
            request_id: 0,
            body: Body::Event {
                action,
                pubsubid,
                rows,
            },
        }
    }

    pub fn set_request_id(&mut self, request_id: u32) {
        self.request_id = request_id;
    }

    /// Serializes the next chunk to a JSON frame body. Returns the body
    /// bytes and whether more chunks remain.
    pub fn serialize(&mut self, batch: usize) -> (Vec<u8>, bool) {
        let mut obj = Map::new();
        let mut more = false;
        match &mut self.body {
            Body::Error { msg } => {
                obj.insert("status".into(), json!("err"));
                obj.insert("msg".into(), json!(msg));
            }
            Body::Ok { action } => {
                obj.insert("status".into(), json!("ok"));
                obj.insert("action".into(), json!(action));
            }
            Body::Status { connections } => {
                obj.insert("status".into(), json!("ok"));
                obj.insert("action".into(), json!("status"));
                obj.insert("connections".into(), json!(connections));
            }
            Body::Data { action, rows } => {
                obj.insert("status".into(), json!("ok"));
                obj.insert("action".into(), json!(action));
                more = rows.write(&mut obj, batch, false);
            }
            Body::Subscribed { pubsubid } => {
                obj.insert("status".into(), json!("ok"));
                obj.insert("action".into(), json!("subscribe"));
                obj.insert("pubsubid".into(), json!(pubsubid.to_string()));
            }
            Body::Unsubscribed { count } => {
                obj.insert("status".into(), json!("ok"));
                obj.insert("action".into(), json!("unsubscribe"));
                obj.insert("subscriptions".into(), json!(count));
            }
            Body::Event {
                action,
                pubsubid,
                rows,
            } => {
                obj.insert("status".into(), json!("ok"));
                obj.insert("action".into(), json!(action));
                obj.insert("pubsubid".into(), json!(pubsubid.to_string()));
                more = rows.write(&mut obj, batch, true);
            }
        }
        let bytes = serde_json::to_vec(&Value::Object(obj)).unwrap_or_default();
        (bytes, more)
    }

    /// Tries to fold `other` into this response. Only pub/sub events
    /// merge, and only when the action, subscription id and projected
    /// column set all match; the trailing event's rows are appended.
    /// Returns `other` back when the pair cannot merge.
    pub fn merge(&mut self, other: Response) -> Option<Response> {
        let compatible = match (&self.body, &other.body) {
            (
                Body::Event {
                    action: a1,
                    pubsubid: p1,
                    rows: r1,
                },
                Body::Event {
                    action: a2,
                    pubsubid: p2,
                    rows: r2,
                },
            ) => a1 == a2 && p1 == p2 && r1.columns == r2.columns,
            _ => false,
        };
        if !compatible {
            return Some(other);
        }
        if let (Body::Event { rows: mine, .. }, Body::Event { rows: theirs, .. }) =
            (&mut self.body, other.body)
        {
            mine.rows.extend(theirs.rows);
        }
        None
    }
}
