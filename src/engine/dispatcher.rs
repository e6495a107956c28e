use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::RequestItem;
use crate::engine::table::Table;
use crate::shutdown::Shutdown;

/// Routes incoming requests to the correct table actor, creating the actor
/// (and its queue) lazily on first reference; after creation it simply
/// forwards. The dispatcher also owns the process-wide subscription id
/// counter that every table actor draws from.
pub struct Dispatcher {
    requests: mpsc::Receiver<RequestItem>,
    tables: HashMap<String, mpsc::Sender<RequestItem>>,
    sub_ids: Arc<AtomicU64>,
    config: Arc<Config>,
    shutdown: Shutdown,
}

impl Dispatcher {
    /// Builds the dispatcher plus the sender half connections feed.
    pub fn new(config: Arc<Config>, shutdown: Shutdown) -> (mpsc::Sender<RequestItem>, Self) {
        let (tx, rx) = mpsc::channel(config.dispatcher_mailbox_capacity);
        (
            tx,
            Self {
                requests: rx,
                tables: HashMap::new(),
                sub_ids: Arc::new(AtomicU64::new(0)),
                config,
                shutdown,
            },
        )
    }

    /// Event loop: receives requests from connected clients and forwards
    /// them to their table's queue, racing the cancellation signal.
    pub async fn run(mut self) {
        let _guard = self.shutdown.join();
        loop {
            tokio::select! {
                item = self.requests.recv() => {
                    let Some(item) = item else { break };
                    if self.shutdown.is_done() {
                        debug!("dispatcher quit");
                        break;
                    }
                    self.forward(item).await;
                }
                _ = self.shutdown.cancelled() => {
                    debug!("dispatcher quit");
                    break;
                }
            }
        }
    }

    async fn forward(&mut self, item: RequestItem) {
        let Some(name) = item.request.table_name() else {
            // commands without a table are routed before they get here
            return;
        };
        let name = name.to_string();
        let queue = match self.tables.get(&name) {
            Some(queue) => queue.clone(),
            None => {
                let (tx, rx) = mpsc::channel(self.config.table_mailbox_capacity);
                let table = Table::new(name.clone(), self.sub_ids.clone());
                info!(
                    table = %name,
                    connection = item.sender.connection_id,
                    "table created"
                );
                tokio::spawn(table.run(rx, self.shutdown.clone()));
                self.tables.insert(name.clone(), tx.clone());
                tx
            }
        };
        // the table queue is bounded; block here rather than drop, but
        // never past cancellation
        tokio::select! {
            result = queue.send(item) => {
                if result.is_err() {
                    debug!(table = %name, "table queue closed");
                }
            }
            _ = self.shutdown.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pubsub::ResponseSender;
    use crate::engine::request::{InsertRequest, Request, Returning, SelectRequest};
    use crate::engine::response::{Body, Response};

    fn item(request_id: u32, request: Request, sender: &ResponseSender) -> RequestItem {
        RequestItem {
            request_id,
            streaming: false,
            request,
            sender: sender.clone(),
        }
    }

    #[tokio::test]
    async fn routes_to_lazily_created_tables() {
        let shutdown = Shutdown::new();
        let (dispatch_tx, dispatcher) = Dispatcher::new(Arc::new(Config::default()), shutdown.clone());
        tokio::spawn(dispatcher.run());

        let (tx, mut rx) = mpsc::channel(16);
        let sender = ResponseSender::new(1, tx, Shutdown::new());

        dispatch_tx
            .send(item(
                1,
                Request::Insert(InsertRequest {
                    table: "stocks".into(),
                    col_vals: vec![crate::engine::request::ColumnValue {
                        col: "ticker".into(),
                        val: "IBM".into(),
                    }],
                    returning: Returning::RowCount,
                }),
                &sender,
            ))
            .await
            .unwrap();
        dispatch_tx
            .send(item(
                2,
                Request::Select(SelectRequest {
                    table: "stocks".into(),
                    cols: Vec::new(),
                    filter: None,
                }),
                &sender,
            ))
            .await
            .unwrap();

        let insert_reply: Response = rx.recv().await.unwrap();
        assert_eq!(insert_reply.request_id, 1);
        assert!(matches!(insert_reply.body, Body::Data { action: "insert", .. }));
        let select_reply = rx.recv().await.unwrap();
        assert_eq!(select_reply.request_id, 2);
        match select_reply.body {
            Body::Data { action: "select", rows } => assert_eq!(rows.rows.len(), 1),
            other => panic!("unexpected body {other:?}"),
        }

        shutdown.quit();
        assert!(shutdown.wait(std::time::Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn separate_tables_get_separate_actors() {
        let shutdown = Shutdown::new();
        let (dispatch_tx, dispatcher) = Dispatcher::new(Arc::new(Config::default()), shutdown.clone());
        tokio::spawn(dispatcher.run());

        let (tx, mut rx) = mpsc::channel(16);
        let sender = ResponseSender::new(1, tx, Shutdown::new());
        for table in ["alpha", "beta"] {
            dispatch_tx
                .send(item(
                    9,
                    Request::Select(SelectRequest {
                        table: table.into(),
                        cols: Vec::new(),
                        filter: None,
                    }),
                    &sender,
                ))
                .await
                .unwrap();
        }
        for _ in 0..2 {
            let reply = rx.recv().await.unwrap();
            match reply.body {
                Body::Data { action: "select", rows } => assert!(rows.rows.is_empty()),
                other => panic!("unexpected body {other:?}"),
            }
        }
        shutdown.quit();
        assert!(shutdown.wait(std::time::Duration::from_secs(1)).await);
    }
}
