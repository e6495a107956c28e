use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::request::{Request, Statement};
use crate::engine::{Dispatcher, RequestItem, Response, ResponseSender};
use crate::net;
use crate::shutdown::Shutdown;
use crate::sql::{TokenBuffer, parse, scan};

/// Starts the database TCP server and handles client connections.
///
/// ## Connection Lifecycle
/// 1. Accept a TCP connection and assign it a connection id
/// 2. Spawn two independent tasks per client: a reader (frame → lex →
///    parse → route) and a writer (drain mailbox → merge → paginate →
///    frame)
/// 3. The reader routes parse errors straight back, `close` to the
///    connection's own cancellation, `status`/`stop` to the control loop,
///    and everything else to the dispatcher
/// 4. The writer owns teardown: on exit it raises the connection signal
///    and drops the registry entry
///
/// Returns once the process-wide cancellation signal is raised; callers
/// then drain the remaining workers via [`Shutdown::wait`].
pub async fn serve(addr: &str, config: Arc<Config>, shutdown: Shutdown) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    serve_listener(listener, config, shutdown).await
}

/// Serves connections on an already-bound listener; [`serve`] delegates
/// here. Useful when the caller binds port 0 and needs the real address.
pub async fn serve_listener(
    listener: TcpListener,
    config: Arc<Config>,
    shutdown: Shutdown,
) -> Result<()> {
    let (dispatch_tx, dispatcher) = Dispatcher::new(config.clone(), shutdown.clone());
    tokio::spawn(dispatcher.run());

    let connections: Connections = Arc::new(Mutex::new(HashMap::new()));
    let (control_tx, control_rx) = mpsc::channel(config.control_mailbox_capacity);
    tokio::spawn(control_loop(control_rx, connections.clone(), shutdown.clone()));

    let _guard = shutdown.join();
    let mut next_connection_id: u64 = 0;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, _peer)) => {
                        next_connection_id += 1;
                        info!(connection = next_connection_id, "new client connection");
                        spawn_connection(
                            socket,
                            next_connection_id,
                            config.clone(),
                            dispatch_tx.clone(),
                            control_tx.clone(),
                            connections.clone(),
                            shutdown.clone(),
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept client connection");
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    // close every live connection; each reader/writer pair observes its
    // own signal and unwinds
    let handles: Vec<ConnectionHandle> = connections.lock().drain().map(|(_, h)| h).collect();
    for handle in handles {
        handle.cancel.quit();
    }
    Ok(())
}

type Connections = Arc<Mutex<HashMap<u64, ConnectionHandle>>>;

struct ConnectionHandle {
    cancel: Shutdown,
}

/// Everything a connection's reader needs to route one statement.
#[derive(Clone)]
struct ConnectionContext {
    id: u64,
    sender: ResponseSender,
    dispatch: mpsc::Sender<RequestItem>,
    control: mpsc::Sender<ControlItem>,
    /// Process-wide cancellation.
    shutdown: Shutdown,
    /// This connection's cancellation.
    cancel: Shutdown,
}

impl ConnectionContext {
    fn done(&self) -> bool {
        // a connection stops because of global shutdown, a full response
        // mailbox, a close command, or a socket error
        self.shutdown.is_done() || self.cancel.is_done()
    }
}

fn spawn_connection(
    socket: TcpStream,
    id: u64,
    config: Arc<Config>,
    dispatch: mpsc::Sender<RequestItem>,
    control: mpsc::Sender<ControlItem>,
    connections: Connections,
    shutdown: Shutdown,
) {
    let cancel = Shutdown::new();
    let (tx, rx) = mpsc::channel(config.response_mailbox_capacity);
    let sender = ResponseSender::new(id, tx, cancel.clone());
    connections.lock().insert(
        id,
        ConnectionHandle {
            cancel: cancel.clone(),
        },
    );
    let ctx = ConnectionContext {
        id,
        sender,
        dispatch,
        control,
        shutdown: shutdown.clone(),
        cancel,
    };
    let (read_half, write_half) = socket.into_split();
    tokio::spawn(read_loop(read_half, ctx.clone()));
    tokio::spawn(write_loop(write_half, rx, config, connections, ctx));
}

async fn read_loop(mut reader: OwnedReadHalf, ctx: ConnectionContext) {
    let _guard = ctx.shutdown.join();
    let mut tokens = TokenBuffer::new();
    loop {
        let frame = tokio::select! {
            frame = net::read_frame(&mut reader) => frame,
            _ = ctx.shutdown.cancelled() => return,
            _ = ctx.cancel.cancelled() => return,
        };
        let (request_id, body) = match frame {
            Ok(frame) => frame,
            Err(e) => {
                if !ctx.done() {
                    warn!(connection = ctx.id, error = %e, "failed to read from client connection");
                    // notify the writer that we are done
                    ctx.cancel.quit();
                }
                return;
            }
        };
        let text = String::from_utf8_lossy(&body);
        tokens.reuse();
        scan(&text, &mut tokens);
        let stmt = parse(&mut tokens);
        route(&ctx, stmt, request_id).await;
    }
}

async fn route(ctx: &ConnectionContext, stmt: Statement, request_id: u32) {
    match stmt.request {
        Request::Error { msg } => {
            ctx.sender.send(Response::error(request_id, msg));
        }
        Request::Close => ctx.cancel.quit(),
        Request::Status => {
            let _ = ctx
                .control
                .send(ControlItem::Status {
                    request_id,
                    streaming: stmt.streaming,
                    sender: ctx.sender.clone(),
                })
                .await;
        }
        Request::Stop => {
            let _ = ctx
                .control
                .send(ControlItem::Stop {
                    connection_id: ctx.id,
                })
                .await;
        }
        request => {
            let item = RequestItem {
                request_id,
                streaming: stmt.streaming,
                request,
                sender: ctx.sender.clone(),
            };
            // the dispatcher queue is bounded; wait for room, but never
            // past cancellation
            tokio::select! {
                result = ctx.dispatch.send(item) => {
                    if result.is_err() {
                        debug!("dispatcher queue closed");
                    }
                }
                _ = ctx.shutdown.cancelled() => {}
                _ = ctx.cancel.cancelled() => {}
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut responses: mpsc::Receiver<Response>,
    config: Arc<Config>,
    connections: Connections,
    ctx: ConnectionContext,
) {
    let _guard = ctx.shutdown.join();
    loop {
        let res = tokio::select! {
            res = responses.recv() => res,
            _ = ctx.shutdown.cancelled() => break,
            _ = ctx.cancel.cancelled() => break,
        };
        let Some(mut res) = res else { break };
        // merge queued notifications into one wire message where possible
        let mut pending = None;
        while let Ok(next) = responses.try_recv() {
            match res.merge(next) {
                None => continue,
                Some(unmerged) => {
                    pending = Some(unmerged);
                    break;
                }
            }
        }
        let written = async {
            write_response(&mut writer, res, config.data_batch_size).await?;
            if let Some(p) = pending {
                write_response(&mut writer, p, config.data_batch_size).await?;
            }
            anyhow::Ok(())
        }
        .await;
        if let Err(e) = written {
            if !ctx.done() {
                warn!(connection = ctx.id, error = %e, "failed to write to client connection");
            }
            break;
        }
    }
    // the writer owns teardown: wake the reader and drop the registry entry
    ctx.cancel.quit();
    connections.lock().remove(&ctx.id);
    debug!(connection = ctx.id, "client connection closed");
}

/// Writes every chunk of a possibly paginated response.
async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    mut res: Response,
    batch: usize,
) -> Result<()> {
    loop {
        let (body, more) = res.serialize(batch);
        net::write_frame(writer, res.request_id, &body).await?;
        if !more {
            return Ok(());
        }
    }
}

enum ControlItem {
    Status {
        request_id: u32,
        streaming: bool,
        sender: ResponseSender,
    },
    Stop {
        connection_id: u64,
    },
}

/// Answers `status` with the live connection count and executes `stop` by
/// raising the process-wide cancellation signal.
async fn control_loop(
    mut control: mpsc::Receiver<ControlItem>,
    connections: Connections,
    shutdown: Shutdown,
) {
    let _guard = shutdown.join();
    loop {
        tokio::select! {
            item = control.recv() => {
                let Some(item) = item else { break };
                match item {
                    ControlItem::Status { request_id, streaming, sender } => {
                        info!(connection = sender.connection_id, "client requested server status");
                        if streaming {
                            continue;
                        }
                        let count = connections.lock().len();
                        sender.send(Response::status(request_id, count));
                    }
                    ControlItem::Stop { connection_id } => {
                        info!(connection = connection_id, "client requested to stop the server");
                        shutdown.quit();
                    }
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
