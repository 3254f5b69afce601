//! Unix-socket JSON-RPC server.
//!
//! Binds a Unix stream socket and spawns a task per connection.  Each line
//! received is parsed as a JSON-RPC request and forwarded, together with a
//! reply channel, to the daemon loop as an [`Incoming`] message; the
//! connection task never touches daemon state itself.
//!
//! A connection that calls `events.subscribe` additionally receives event
//! notifications, interleaved with the responses to any further requests.
//! Each notification write is bounded by the configured subscriber
//! timeout; a subscriber that cannot keep up is disconnected.

use crate::config::IpcConfig;
use crate::ipc::bus::EventLine;
use crate::ipc::protocol::{codes, parse_request, Request, Response, RpcError};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};

/// Method handled specially by connections: it turns the connection into a
/// subscriber.
pub const SUBSCRIBE_METHOD: &str = "events.subscribe";

/// Longest accepted request line.
const MAX_LINE_LEN: usize = 1024 * 1024;

/// A message from a connection task to the daemon loop.
#[derive(Debug)]
pub enum Incoming {
    Request {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    /// An `events.subscribe` request.  On success the daemon registers
    /// `events` with its event bus.
    Subscribe {
        request: Request,
        events: mpsc::Sender<EventLine>,
        reply: oneshot::Sender<Response>,
    },
}

#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    queue: usize,
    write_timeout: Duration,
}

/// JSON-RPC server bound to a Unix socket.
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
    options: ConnectionOptions,
}

impl IpcServer {
    /// Bind the socket.  A stale socket file is replaced; a socket with a
    /// live daemon behind it is an `AddrInUse` error.
    pub async fn bind(socket_path: impl AsRef<Path>, config: &IpcConfig) -> io::Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if socket_path.exists() {
            if UnixStream::connect(&socket_path).await.is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("another daemon is listening on {}", socket_path.display()),
                ));
            }
            std::fs::remove_file(&socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;
        info!("listening on {}", socket_path.display());

        Ok(Self {
            socket_path,
            listener,
            options: ConnectionOptions {
                queue: config.subscriber_queue.max(1),
                write_timeout: config.subscriber_timeout(),
            },
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` flips to `true`, then remove the
    /// socket file.
    pub async fn run(self, incoming: mpsc::Sender<Incoming>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        debug!("client connected");
                        let incoming = incoming.clone();
                        let options = self.options;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, incoming, options).await {
                                debug!("client error: {}", e);
                            }
                            debug!("client disconnected");
                        });
                    }
                    Err(e) => error!("accept error: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("IPC server shutting down");
                        break;
                    }
                }
            }
        }
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// One read from a [`LineReader`].
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Complete(String),
    /// A line longer than the limit; its bytes were discarded.
    TooLong,
}

/// Splits a stream into lines of at most `max` bytes, never buffering more
/// than that.
struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    max: usize,
    /// Inside a line already reported as too long.
    skipping: bool,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    fn new(inner: R, max: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max,
            skipping: false,
        }
    }

    /// The next line, `None` at end of stream.  Cancel safe: a partial line
    /// stays buffered for the next call.
    async fn next(&mut self) -> io::Result<Option<Line>> {
        loop {
            let room = (self.max + 1).saturating_sub(self.buf.len()) as u64;
            let n = (&mut self.inner)
                .take(room)
                .read_until(b'\n', &mut self.buf)
                .await?;
            let complete = self.buf.last() == Some(&b'\n');

            if !complete && self.buf.len() > self.max {
                self.buf.clear();
                if !self.skipping {
                    self.skipping = true;
                    return Ok(Some(Line::TooLong));
                }
                continue;
            }
            if n == 0 && self.buf.is_empty() {
                return Ok(None);
            }

            let bytes = std::mem::take(&mut self.buf);
            if std::mem::replace(&mut self.skipping, false) {
                continue;
            }
            let line = String::from_utf8_lossy(&bytes);
            return Ok(Some(Line::Complete(
                line.trim_end_matches(['\n', '\r']).to_string(),
            )));
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Hand a message to the daemon and wait for its response.  `None` if the
/// daemon loop is gone.
async fn forward(
    incoming: &mpsc::Sender<Incoming>,
    make: impl FnOnce(oneshot::Sender<Response>) -> Incoming,
) -> Option<Response> {
    let (tx, rx) = oneshot::channel();
    incoming.send(make(tx)).await.ok()?;
    rx.await.ok()
}

async fn next_event(events: &mut Option<mpsc::Receiver<EventLine>>) -> Option<EventLine> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_connection(
    stream: UnixStream,
    incoming: mpsc::Sender<Incoming>,
    options: ConnectionOptions,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = LineReader::new(BufReader::new(reader), MAX_LINE_LEN);
    let mut events: Option<mpsc::Receiver<EventLine>> = None;

    loop {
        tokio::select! {
            line = lines.next() => {
                let line = match line? {
                    None => return Ok(()),
                    Some(Line::Complete(line)) => line,
                    Some(Line::TooLong) => {
                        warn!("request longer than {} bytes rejected", MAX_LINE_LEN);
                        let response = Response::failure(
                            Value::Null,
                            RpcError::new(codes::INVALID_REQUEST, "request too large"),
                        );
                        write_line(&mut writer, &response.to_line()).await?;
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let request = match parse_request(&line) {
                    Ok(request) => request,
                    Err(response) => {
                        debug!("rejected line: {:?}", response.error);
                        write_line(&mut writer, &response.to_line()).await?;
                        continue;
                    }
                };

                let notification = request.id.is_none();
                let response = if request.method == SUBSCRIBE_METHOD {
                    let (tx, rx) = mpsc::channel(options.queue);
                    let response = forward(&incoming, |reply| Incoming::Subscribe {
                        request,
                        events: tx,
                        reply,
                    })
                    .await;
                    if response.as_ref().is_some_and(|r| r.error.is_none()) {
                        events = Some(rx);
                    }
                    response
                } else {
                    forward(&incoming, |reply| Incoming::Request { request, reply }).await
                };

                let Some(response) = response else {
                    warn!("daemon loop gone, closing connection");
                    return Ok(());
                };
                if !notification {
                    write_line(&mut writer, &response.to_line()).await?;
                }
            }
            event = next_event(&mut events) => {
                let Some(line) = event else {
                    events = None;
                    continue;
                };
                match tokio::time::timeout(options.write_timeout, write_line(&mut writer, &line)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        warn!("subscriber too slow (>{:?}), disconnecting", options.write_timeout);
                        return Ok(());
                    }
                }
            }
        }
    }
}
