//! Parsed request model.
//!
//! Requests are transient: one is built per incoming message and consumed
//! by the table actor (or the control loop) that executes it. The variant
//! set is closed; anything the grammar cannot express becomes
//! [`Request::Error`] and is never partially executed.

/// A `column = value` pair from an insert or update statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnValue {
    pub col: String,
    pub val: String,
}

/// The single supported predicate: one equality on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub col: String,
    pub val: String,
}

/// Trailing `returning` clause of a mutating statement.
///
/// - `RowCount`: clause omitted; report only the number of rows affected.
/// - `All`: `returning *`; echo all columns of the affected rows.
/// - `Columns`: explicit list; echo only those columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Returning {
    #[default]
    RowCount,
    All,
    Columns(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRequest {
    pub table: String,
    pub col_vals: Vec<ColumnValue>,
    pub returning: Returning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectRequest {
    pub table: String,
    /// Projection; empty means `*`.
    pub cols: Vec<String>,
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub table: String,
    pub col_vals: Vec<ColumnValue>,
    pub filter: Option<Filter>,
    pub returning: Returning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub table: String,
    pub filter: Option<Filter>,
    pub returning: Returning,
}

/// `push [front|back] into ...` — an insert plus queue-end ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub insert: InsertRequest,
    pub front: bool,
}

/// `pop|peek [front|back] ...` — a select plus queue-end ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueReadRequest {
    pub table: String,
    /// Projection; empty with `star` unset means no data requested.
    pub cols: Vec<String>,
    pub star: bool,
    pub front: bool,
}

/// `key T c` / `tag T c` — promote a column to an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRequest {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub table: String,
    pub skip: bool,
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeRequest {
    pub table: String,
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Insert(InsertRequest),
    Select(SelectRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
    Push(PushRequest),
    Pop(QueueReadRequest),
    Peek(QueueReadRequest),
    Key(IndexRequest),
    Tag(IndexRequest),
    Subscribe(SubscribeRequest),
    SubscribeTopic { topic: String },
    Unsubscribe(UnsubscribeRequest),
    Status,
    Stop,
    Close,
    Error { msg: String },
}

impl Request {
    /// Table this request routes to; `None` for commands handled outside
    /// the data path.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Request::Insert(r) => Some(&r.table),
            Request::Select(r) => Some(&r.table),
            Request::Update(r) => Some(&r.table),
            Request::Delete(r) => Some(&r.table),
            Request::Push(r) => Some(&r.insert.table),
            Request::Pop(r) | Request::Peek(r) => Some(&r.table),
            Request::Key(r) | Request::Tag(r) => Some(&r.table),
            Request::Subscribe(r) => Some(&r.table),
            Request::SubscribeTopic { topic } => Some(topic),
            Request::Unsubscribe(r) => Some(&r.table),
            Request::Status | Request::Stop | Request::Close | Request::Error { .. } => None,
        }
    }
}

/// One parsed statement: the request plus the `stream` modifier flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub streaming: bool,
    pub request: Request,
}

impl Statement {
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            streaming: false,
            request: Request::Error { msg: msg.into() },
        }
    }
}
