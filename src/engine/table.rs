//! The table actor: one table's columns, records, indexes and subscriber
//! groups, owned exclusively by one sequential worker.
//!
//! All methods here are plain synchronous calls; [`Table::run`] wraps them
//! in an event loop that processes one request at a time from a bounded
//! queue, which is what makes per-table operations linearizable without a
//! single lock in the storage or index code.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::RequestItem;
use crate::engine::column::{Column, ColumnKind};
use crate::engine::index::{GroupHandle, Removal};
use crate::engine::pubsub::{PubSub, ResponseSender, Subscription, SubscriptionRegistry};
use crate::engine::record::{Link, Record};
use crate::engine::request::{
    DeleteRequest, Filter, IndexRequest, InsertRequest, Request, Returning, SelectRequest,
    SubscribeRequest, UnsubscribeRequest, UpdateRequest,
};
use crate::engine::response::{ColumnRef, Response, RowSet};
use crate::shutdown::Shutdown;

pub struct Table {
    name: String,
    columns: Vec<Column>,
    by_name: HashMap<String, usize>,
    /// Record list; a record's id is its position here. Deleted records
    /// become `None` and the slot is never reused.
    records: Vec<Option<Record>>,
    /// Ordinals of indexed columns, in link-slot order.
    indexed: Vec<usize>,
    /// Table-scoped subscriptions.
    watchers: PubSub,
    subscriptions: SubscriptionRegistry,
    /// Process-wide subscription id counter, injected by the dispatcher.
    sub_ids: Arc<AtomicU64>,
    /// Request id of the message currently being processed.
    request_id: u32,
    /// Live (non-tombstoned) record count.
    live: usize,
}

impl Table {
    pub fn new(name: impl Into<String>, sub_ids: Arc<AtomicU64>) -> Self {
        let mut table = Self {
            name: name.into(),
            columns: Vec::new(),
            by_name: HashMap::new(),
            records: Vec::new(),
            indexed: Vec::new(),
            watchers: PubSub::default(),
            subscriptions: SubscriptionRegistry::default(),
            sub_ids,
            request_id: 0,
            live: 0,
        };
        table.add_column("id");
        table
    }

    // COLUMNS

    pub fn column_count(&self) -> usize {
        debug_assert_eq!(self.columns.len(), self.by_name.len());
        self.columns.len()
    }

    fn add_column(&mut self, name: &str) -> usize {
        let ordinal = self.columns.len();
        self.columns.push(Column::new(name, ordinal));
        self.by_name.insert(name.to_string(), ordinal);
        ordinal
    }

    /// Existing column or a lazily created one; true when it was added.
    fn get_add_column(&mut self, name: &str) -> (usize, bool) {
        match self.by_name.get(name) {
            Some(&ordinal) => (ordinal, false),
            None => (self.add_column(name), true),
        }
    }

    fn get_column(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Rolls back columns created by a request that failed validation,
    /// so schema stays consistent with committed data.
    fn remove_columns(&mut self, from: usize) {
        for col in self.columns.drain(from..) {
            self.by_name.remove(&col.name);
        }
    }

    // RECORDS

    pub fn record_count(&self) -> usize {
        self.live
    }

    fn live_ids(&self) -> Vec<usize> {
        (0..self.records.len())
            .filter(|&id| self.records[id].is_some())
            .collect()
    }

    fn record_by_id(&self, val: &str) -> Option<usize> {
        let id: usize = val.parse().ok()?;
        if self.records.get(id)?.is_some() {
            Some(id)
        } else {
            None
        }
    }

    /// Resolves a filter to its column ordinal. Filtering is only valid on
    /// the id column, a Key or a Tag; a Normal column is a user error, not
    /// a table scan.
    fn resolve_filter(&self, filter: &Option<Filter>) -> Result<Option<usize>, Response> {
        let Some(f) = filter else { return Ok(None) };
        let Some(ordinal) = self.get_column(&f.col) else {
            return Err(Response::error(0, format!("invalid column: {}", f.col)));
        };
        if self.columns[ordinal].kind == ColumnKind::Normal {
            return Err(Response::error(
                0,
                format!("can not use non indexed column {} as a filter", f.col),
            ));
        }
        Ok(Some(ordinal))
    }

    /// Record ids matching the filter: O(1) for id, O(k) for Key/Tag
    /// groups, all live records when there is no filter.
    fn filtered_ids(&self, filter: &Option<Filter>) -> Result<Vec<usize>, Response> {
        let ordinal = self.resolve_filter(filter)?;
        let val = filter.as_ref().map_or("", |f| f.val.as_str());
        Ok(match ordinal {
            None => self.live_ids(),
            Some(ord) => match self.columns[ord].kind {
                ColumnKind::Id => self.record_by_id(val).into_iter().collect(),
                ColumnKind::Key | ColumnKind::Tag => self.columns[ord]
                    .index
                    .as_ref()
                    .map(|ix| ix.records(val))
                    .unwrap_or_default(),
                ColumnKind::Normal => Vec::new(),
            },
        })
    }

    // PROJECTION

    fn column_refs(&self, ordinals: &[usize]) -> Vec<ColumnRef> {
        let all = 0..self.columns.len();
        let picked: Vec<usize> = if ordinals.is_empty() {
            all.collect()
        } else {
            ordinals.to_vec()
        };
        picked
            .into_iter()
            .map(|o| ColumnRef {
                name: self.columns[o].name.clone(),
                ordinal: o,
            })
            .collect()
    }

    /// Copies the named records into a row set; an empty `ordinals` means
    /// every column. Tombstoned ids are skipped.
    fn project(&self, ids: &[usize], ordinals: &[usize]) -> RowSet {
        let columns = self.column_refs(ordinals);
        let picked: Vec<usize> = columns.iter().map(|c| c.ordinal).collect();
        let rows = ids
            .iter()
            .filter_map(|&id| self.records.get(id).and_then(Option::as_ref))
            .map(|rec| picked.iter().map(|&o| rec.get(o).to_string()).collect())
            .collect();
        RowSet::projected(columns, rows)
    }

    /// Resolves a returning clause: `None` means report a row count only,
    /// `Some(empty)` means all columns. Unknown names are created, the
    /// same lenient schema-on-read behavior select has.
    fn returning_ordinals(&mut self, returning: &Returning) -> Option<Vec<usize>> {
        match returning {
            Returning::RowCount => None,
            Returning::All => Some(Vec::new()),
            Returning::Columns(names) => {
                Some(names.iter().map(|n| self.get_add_column(n).0).collect())
            }
        }
    }

    // INDEX MAINTENANCE

    /// Indexes record `id`'s current value for column `ord` and records
    /// the node/group handles in the record's link slot.
    fn tag_value(&mut self, ord: usize, id: usize) -> Option<GroupHandle> {
        let slot = self.columns[ord].slot;
        let val = self.records[id].as_ref().map(|r| r.get(ord).to_string())?;
        let (node, group) = self.columns[ord].index.as_mut()?.add(&val, id);
        let rec = self.records[id].as_mut()?;
        rec.ensure_slot(slot);
        rec.links[slot] = Link {
            node: Some(node),
            group: Some(group),
        };
        Some(group)
    }

    /// Removes record `id` from column `ord`'s index, fixing up the slid
    /// record's link on a head removal. Returns the group the record was
    /// removed from, if it was indexed at all.
    fn unindex_record(&mut self, ord: usize, id: usize) -> Option<GroupHandle> {
        let slot = self.columns[ord].slot;
        let rec = self.records[id].as_ref()?;
        let lnk = rec.links.get(slot).copied().unwrap_or_default();
        if let Some(node) = lnk.node {
            let val = rec.get(ord).to_string();
            let removal = self.columns[ord].index.as_mut()?.remove(node, &val);
            if let Removal::Slid { head, moved } = removal {
                // the successor's payload moved into the head node, so the
                // record that owned the successor must point at the head
                if let Some(slid) = self.records[moved].as_mut() {
                    slid.ensure_slot(slot);
                    slid.links[slot].node = Some(head);
                }
            }
        }
        if let Some(rec) = self.records[id].as_mut() {
            rec.ensure_slot(slot);
            rec.links[slot] = Link::default();
        }
        lnk.group
    }

    /// Moves record `id` to a new value for an indexed column, collecting
    /// the group it left and the group it joined when they differ.
    fn reindex_value(
        &mut self,
        ord: usize,
        id: usize,
        val: &str,
        removed: &mut Vec<GroupHandle>,
        added: &mut HashSet<GroupHandle>,
    ) {
        let old = self.unindex_record(ord, id);
        if let Some(rec) = self.records[id].as_mut() {
            rec.set(ord, val.to_string());
        }
        let Some(new) = self.tag_value(ord, id) else {
            return;
        };
        if old == Some(new) {
            // updated to the same value; nothing changed group-wise
            return;
        }
        if let Some(g) = old {
            removed.push(g);
        }
        added.insert(new);
    }

    // NOTIFICATIONS

    fn visit_group(&mut self, gh: GroupHandle, visitor: impl FnMut(&Subscription) -> bool) {
        let ord = self.indexed[gh.slot];
        if let Some(ix) = self.columns[ord].index.as_mut() {
            ix.group_mut(gh.group).visit(visitor);
        }
    }

    /// Fires `action` for record `id` to every subscriber in scope: the
    /// whole table, each value group the record belongs to, and the record
    /// itself. The event carries all columns.
    fn notify_record(&mut self, id: usize, action: &'static str) {
        let rows = self.project(&[id], &[]);
        self.watchers
            .visit(|sub| sub.send(Response::event(action, sub.id, rows.clone())));
        let links: Vec<Link> = match self.records[id].as_ref() {
            Some(rec) => rec.links.clone(),
            None => return,
        };
        for lnk in links {
            if let Some(gh) = lnk.group {
                self.visit_group(gh, |sub| {
                    sub.send(Response::event(action, sub.id, rows.clone()))
                });
            }
        }
        if let Some(rec) = self.records[id].as_mut() {
            rec.watchers
                .visit(|sub| sub.send(Response::event(action, sub.id, rows.clone())));
        }
    }

    /// Fires `action` for record `id` to the named groups only.
    fn notify_groups(&mut self, groups: &[GroupHandle], id: usize, action: &'static str) {
        let rows = self.project(&[id], &[]);
        for &gh in groups {
            self.visit_group(gh, |sub| {
                sub.send(Response::event(action, sub.id, rows.clone()))
            });
        }
    }

    /// Fires the update broadcast: table and record subscribers plus each
    /// value group the record belongs to, except groups it just joined —
    /// those were told "add" instead, and a freshly joined subscriber
    /// should see the record as newly visible, not as an edit. The event
    /// carries the id column plus the touched columns.
    fn notify_update(&mut self, event_ords: &[usize], id: usize, added: &HashSet<GroupHandle>) {
        let rows = self.project(&[id], event_ords);
        self.watchers
            .visit(|sub| sub.send(Response::event("update", sub.id, rows.clone())));
        let links: Vec<Link> = match self.records[id].as_ref() {
            Some(rec) => rec.links.clone(),
            None => return,
        };
        for lnk in links {
            if let Some(gh) = lnk.group {
                if added.contains(&gh) {
                    continue;
                }
                self.visit_group(gh, |sub| {
                    sub.send(Response::event("update", sub.id, rows.clone()))
                });
            }
        }
        if let Some(rec) = self.records[id].as_mut() {
            rec.watchers
                .visit(|sub| sub.send(Response::event("update", sub.id, rows.clone())));
        }
    }

    // INSERT

    /// Validates every Key column of the new row before committing any of
    /// it; on a collision the columns this request created are rolled
    /// back so the schema stays consistent.
    pub fn insert(&mut self, req: &InsertRequest) -> Response {
        let original_cols = self.column_count();
        let mut ords = Vec::with_capacity(req.col_vals.len());
        for cv in &req.col_vals {
            let (ord, _) = self.get_add_column(&cv.col);
            let col = &self.columns[ord];
            if col.is_key() && col.index.as_ref().is_some_and(|ix| ix.contains(&cv.val)) {
                self.remove_columns(original_cols);
                return Response::error(
                    0,
                    format!(
                        "insert failed due to duplicate column key:{} value:{}",
                        cv.col, cv.val
                    ),
                );
            }
            ords.push(ord);
        }
        let id = self.records.len();
        let mut rec = Record::new(self.column_count(), self.indexed.len());
        rec.set(0, id.to_string());
        for (cv, &ord) in req.col_vals.iter().zip(&ords) {
            if self.columns[ord].kind != ColumnKind::Id {
                rec.set(ord, cv.val.clone());
            }
        }
        self.records.push(Some(rec));
        self.live += 1;
        for &ord in &ords {
            if matches!(self.columns[ord].kind, ColumnKind::Key | ColumnKind::Tag) {
                self.tag_value(ord, id);
            }
        }
        self.notify_record(id, "insert");
        let rows = match self.returning_ordinals(&req.returning) {
            None => RowSet::counted(1),
            Some(ords) => self.project(&[id], &ords),
        };
        Response::data(0, "insert", rows)
    }

    // SELECT

    pub fn select(&mut self, req: &SelectRequest) -> Response {
        let ids = match self.filtered_ids(&req.filter) {
            Ok(ids) => ids,
            Err(res) => return res,
        };
        let ords: Vec<usize> = req.cols.iter().map(|c| self.get_add_column(c).0).collect();
        Response::data(0, "select", self.project(&ids, &ords))
    }

    // UPDATE

    pub fn update(&mut self, req: &UpdateRequest) -> Response {
        let ids = match self.filtered_ids(&req.filter) {
            Ok(ids) => ids,
            Err(res) => return res,
        };
        // pre-validate key changes; a self-update to the same value is
        // allowed only when the holder is the single matched record
        let only = if ids.len() == 1 { Some(ids[0]) } else { None };
        let original_cols = self.column_count();
        let mut ords = Vec::with_capacity(req.col_vals.len());
        for cv in &req.col_vals {
            let (ord, _) = self.get_add_column(&cv.col);
            let col = &self.columns[ord];
            if col.is_key() {
                if let Some(holder) = col.index.as_ref().and_then(|ix| ix.first_record(&cv.val)) {
                    if only != Some(holder) {
                        self.remove_columns(original_cols);
                        return Response::error(
                            0,
                            format!(
                                "update failed due to duplicate column key:{} value:{}",
                                cv.col, cv.val
                            ),
                        );
                    }
                }
            }
            ords.push(ord);
        }
        let mut event_ords = vec![0];
        event_ords.extend(ords.iter().copied().filter(|&o| o != 0));
        let mut updated = 0;
        for &id in &ids {
            if self.records.get(id).map_or(true, Option::is_none) {
                continue;
            }
            updated += 1;
            let mut removed: Vec<GroupHandle> = Vec::new();
            let mut added: HashSet<GroupHandle> = HashSet::new();
            for (cv, &ord) in req.col_vals.iter().zip(&ords) {
                match self.columns[ord].kind {
                    ColumnKind::Key | ColumnKind::Tag => {
                        self.reindex_value(ord, id, &cv.val, &mut removed, &mut added);
                    }
                    ColumnKind::Normal => {
                        if let Some(rec) = self.records[id].as_mut() {
                            rec.set(ord, cv.val.clone());
                        }
                    }
                    ColumnKind::Id => {}
                }
            }
            if !removed.is_empty() {
                self.notify_groups(&removed, id, "remove");
            }
            if !added.is_empty() {
                let list: Vec<GroupHandle> = added.iter().copied().collect();
                self.notify_groups(&list, id, "add");
            }
            self.notify_update(&event_ords, id, &added);
        }
        let rows = match self.returning_ordinals(&req.returning) {
            None => RowSet::counted(updated),
            Some(ords) => self.project(&ids, &ords),
        };
        Response::data(0, "update", rows)
    }

    // DELETE

    pub fn delete(&mut self, req: &DeleteRequest) -> Response {
        let ids = match self.filtered_ids(&req.filter) {
            Ok(ids) => ids,
            Err(res) => return res,
        };
        let ret_ords = self.returning_ordinals(&req.returning);
        let columns = ret_ords
            .as_ref()
            .map(|ords| self.column_refs(ords))
            .unwrap_or_default();
        let picked: Vec<usize> = columns.iter().map(|c| c.ordinal).collect();
        let mut deleted = 0;
        let mut echoed: Vec<Vec<String>> = Vec::new();
        for &id in &ids {
            let Some(rec) = self.records.get(id).and_then(Option::as_ref) else {
                continue;
            };
            deleted += 1;
            if ret_ords.is_some() {
                echoed.push(picked.iter().map(|&o| rec.get(o).to_string()).collect());
            }
            self.notify_record(id, "delete");
            self.remove_record(id);
        }
        let rows = match ret_ords {
            None => RowSet::counted(deleted),
            Some(_) => RowSet::projected(columns, echoed),
        };
        Response::data(0, "delete", rows)
    }

    fn remove_record(&mut self, id: usize) {
        for ord in self.indexed.clone() {
            self.unindex_record(ord, id);
        }
        if self.records[id].take().is_some() {
            self.live -= 1;
        }
    }

    // KEY / TAG

    pub fn define_key(&mut self, req: &IndexRequest) -> Response {
        let existing = self.get_column(&req.column);
        if let Some(ord) = existing {
            if self.columns[ord].is_indexed() {
                return Response::error(
                    0,
                    format!("key or tag already defined for column:{}", req.column),
                );
            }
        }
        if existing.is_none() && !self.records.is_empty() {
            // cannot retroactively assert uniqueness for values no record
            // ever declared
            return Response::error(
                0,
                "can not define key for non existent column due to possible duplicates",
            );
        }
        if let Some(ord) = existing {
            let mut unique = HashSet::new();
            for rec in self.records.iter().flatten() {
                if !unique.insert(rec.get(ord).to_string()) {
                    return Response::error(
                        0,
                        "can not define key due to possible duplicates in existing records",
                    );
                }
            }
        }
        self.index_column(&req.column, ColumnKind::Key);
        Response::ok(0, "key")
    }

    pub fn define_tag(&mut self, req: &IndexRequest) -> Response {
        if let Some(ord) = self.get_column(&req.column) {
            if self.columns[ord].is_indexed() {
                return Response::error(
                    0,
                    format!("key or tag already defined for column:{}", req.column),
                );
            }
        }
        self.index_column(&req.column, ColumnKind::Tag);
        Response::ok(0, "tag")
    }

    /// Promotes a column and indexes every live record's current value.
    fn index_column(&mut self, name: &str, kind: ColumnKind) {
        let (ord, _) = self.get_add_column(name);
        let slot = self.indexed.len();
        self.indexed.push(ord);
        self.columns[ord].make_indexed(kind, slot);
        for id in 0..self.records.len() {
            if self.records[id].is_some() {
                self.tag_value(ord, id);
            }
        }
    }

    // SUBSCRIBE / UNSUBSCRIBE

    fn new_subscription(&mut self, sender: &ResponseSender) -> Arc<Subscription> {
        let id = self.sub_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let sub = Subscription::new(id, sender.clone());
        self.subscriptions.add(sub.clone());
        sub
    }

    fn ack(&self, sender: &ResponseSender, sub: &Subscription) {
        self.send(sender, Response::subscribed(0, sub.id));
    }

    /// Registers a subscription for the request's scope, acknowledges it,
    /// and — unless `skip` was asked for — follows up with one Add event
    /// carrying every row currently in scope. Responses go straight to
    /// the connection's mailbox; there is no return value.
    pub fn subscribe(&mut self, req: &SubscribeRequest, sender: &ResponseSender) {
        let ordinal = match self.resolve_filter(&req.filter) {
            Ok(ord) => ord,
            Err(res) => {
                self.send(sender, res);
                return;
            }
        };
        let val = req.filter.as_ref().map_or("", |f| f.val.as_str()).to_string();
        let (sub, scope) = match ordinal {
            None => {
                let sub = self.new_subscription(sender);
                self.watchers.add(sub.clone());
                self.ack(sender, &sub);
                let scope = if req.skip { Vec::new() } else { self.live_ids() };
                (sub, scope)
            }
            Some(ord) => match self.columns[ord].kind {
                ColumnKind::Id => {
                    let Some(id) = self.record_by_id(&val) else {
                        self.send(
                            sender,
                            Response::error(0, format!("id: {} does not exist", val)),
                        );
                        return;
                    };
                    let sub = self.new_subscription(sender);
                    if let Some(rec) = self.records[id].as_mut() {
                        rec.watchers.add(sub.clone());
                    }
                    self.ack(sender, &sub);
                    let scope = if req.skip { Vec::new() } else { vec![id] };
                    (sub, scope)
                }
                ColumnKind::Key | ColumnKind::Tag => {
                    let sub = self.new_subscription(sender);
                    let scope = if req.skip {
                        Vec::new()
                    } else {
                        self.columns[ord]
                            .index
                            .as_ref()
                            .map(|ix| ix.records(&val))
                            .unwrap_or_default()
                    };
                    if let Some(ix) = self.columns[ord].index.as_mut() {
                        let gh = ix.group_entry(&val);
                        ix.group_mut(gh.group).add(sub.clone());
                    }
                    self.ack(sender, &sub);
                    (sub, scope)
                }
                // resolve_filter already rejected Normal columns
                ColumnKind::Normal => return,
            },
        };
        if !scope.is_empty() && self.live > 0 {
            let rows = self.project(&scope, &[]);
            sub.send(Response::event("add", sub.id, rows));
        }
    }

    /// Removes one named subscription or every subscription owned by the
    /// connection, reporting how many were removed.
    pub fn unsubscribe(&mut self, req: &UnsubscribeRequest, connection_id: u64) -> Response {
        match &req.filter {
            Some(f) if f.col != "pubsubid" => Response::error(
                0,
                format!("invalid filter expected pubsubid but got {}", f.col),
            ),
            Some(f) => match f.val.parse::<u64>() {
                Ok(pubsubid) => {
                    let count = usize::from(self.subscriptions.deactivate(connection_id, pubsubid));
                    Response::unsubscribed(0, count)
                }
                Err(_) => Response::error(
                    0,
                    format!("failed to unsubscribe, pubsubid {} is not valid", f.val),
                ),
            },
            None => Response::unsubscribed(0, self.subscriptions.deactivate_all(connection_id)),
        }
    }

    // EVENT LOOP

    fn send(&self, sender: &ResponseSender, mut res: Response) {
        res.set_request_id(self.request_id);
        sender.send(res);
    }

    /// Sequential event loop: exactly one request in flight per table,
    /// FIFO order preserved, racing the cancellation signal.
    pub async fn run(mut self, mut requests: mpsc::Receiver<RequestItem>, shutdown: Shutdown) {
        let _guard = shutdown.join();
        loop {
            tokio::select! {
                item = requests.recv() => {
                    let Some(item) = item else { break };
                    if shutdown.is_done() {
                        debug!(table = %self.name, "table actor quit");
                        break;
                    }
                    self.request_id = item.request_id;
                    self.handle(item);
                }
                _ = shutdown.cancelled() => {
                    debug!(table = %self.name, "table actor quit");
                    break;
                }
            }
        }
    }

    fn handle(&mut self, item: RequestItem) {
        let sender = item.sender;
        match item.request {
            Request::Insert(req) => {
                let res = self.insert(&req);
                self.send(&sender, res);
            }
            Request::Select(req) => {
                let res = self.select(&req);
                self.send(&sender, res);
            }
            Request::Update(req) => {
                let res = self.update(&req);
                self.send(&sender, res);
            }
            Request::Delete(req) => {
                let res = self.delete(&req);
                self.send(&sender, res);
            }
            Request::Key(req) => {
                let res = self.define_key(&req);
                self.send(&sender, res);
            }
            Request::Tag(req) => {
                let res = self.define_tag(&req);
                self.send(&sender, res);
            }
            Request::Subscribe(req) => self.subscribe(&req, &sender),
            Request::SubscribeTopic { .. } => {
                // a topic is a pure stream: whole-table scope, no snapshot
                let req = SubscribeRequest {
                    table: self.name.clone(),
                    skip: true,
                    filter: None,
                };
                self.subscribe(&req, &sender);
            }
            Request::Unsubscribe(req) => {
                let res = self.unsubscribe(&req, sender.connection_id);
                self.send(&sender, res);
            }
            Request::Push(_) => self.send(&sender, Response::error(0, "push is not supported")),
            Request::Pop(_) => self.send(&sender, Response::error(0, "pop is not supported")),
            Request::Peek(_) => self.send(&sender, Response::error(0, "peek is not supported")),
            // commands are handled before dispatch and never reach a table
            Request::Status | Request::Stop | Request::Close | Request::Error { .. } => {}
        }
    }
}
