//! TCP port forwarding through a broker channel.
//!
//! The exposing side (channel host) dials a local target for every stream
//! the connecting side opens. The connecting side (channel client) listens
//! on a local port and turns each accepted connection into a stream. Bytes
//! flow as [`Envelope`]s; both sides poll the broker and back off by the
//! configured interval whenever it has nothing for them.
//!
//! Every stream runs in its own task and is fed through a bounded queue, so
//! the poll loop never waits on a socket. A stream whose queue fills up is
//! dropped and the other side is told to close it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use rendezvous_config::ClientConfig;

use crate::connection::ChannelHandle;
use crate::envelope::Envelope;
use crate::TunnelError;

/// Frames buffered per stream before the stream is dropped as stuck.
pub const STREAM_QUEUE_DEPTH: usize = 64;

/// Closed stream ids remembered so a late marker cannot reopen them.
pub const CLOSED_STREAM_MEMORY: usize = 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

async fn send_marker(channel: &ChannelHandle, stream_id: &str) {
    let sent = match Envelope::marker(stream_id).encode() {
        Ok(frame) => channel.send(frame).await,
        Err(e) => Err(e),
    };
    if let Err(e) = sent {
        warn!(stream = %stream_id, error = %e, "Failed to send close marker");
    }
}

/// Read from `reader` and forward every chunk as a data envelope until EOF,
/// then send the closing marker.
async fn pump_to_broker(
    channel: &ChannelHandle,
    stream_id: &str,
    mut reader: OwnedReadHalf,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(stream = %stream_id, "Local socket closed");
                break;
            }
            Ok(n) => {
                let sent = match Envelope::data(stream_id, &buf[..n]).encode() {
                    Ok(frame) => channel.send(frame).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    warn!(stream = %stream_id, error = %e, "Failed to forward data");
                    break;
                }
            }
            Err(e) => {
                warn!(stream = %stream_id, error = %e, "Local socket read failed");
                break;
            }
        }
    }
    send_marker(channel, stream_id).await;
}

#[derive(Debug, PartialEq, Eq)]
enum WriteEnd {
    /// The remote side closed the stream and every queued frame was written.
    RemoteClosed,
    Failed,
}

async fn write_chunks(
    stream_id: &str,
    mut writer: OwnedWriteHalf,
    mut chunks: mpsc::Receiver<Vec<u8>>,
) -> WriteEnd {
    while let Some(chunk) = chunks.recv().await {
        match timeout(WRITE_TIMEOUT, writer.write_all(&chunk)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(stream = %stream_id, error = %e, "Local socket write failed");
                return WriteEnd::Failed;
            }
            Err(_) => {
                warn!(stream = %stream_id, "Local socket stopped reading");
                return WriteEnd::Failed;
            }
        }
    }
    debug!(stream = %stream_id, "Remote closed stream");
    let _ = writer.shutdown().await;
    WriteEnd::RemoteClosed
}

/// Carry one stream in both directions until either side finishes.
async fn drive_stream(
    channel: &ChannelHandle,
    stream_id: &str,
    socket: TcpStream,
    chunks: mpsc::Receiver<Vec<u8>>,
    buffer_size: usize,
) {
    let (reader, writer) = socket.into_split();
    tokio::select! {
        _ = pump_to_broker(channel, stream_id, reader, buffer_size) => {}
        end = write_chunks(stream_id, writer, chunks) => {
            if end == WriteEnd::Failed {
                send_marker(channel, stream_id).await;
            }
        }
    }
}

/// Poll once; sleep for `interval` if the broker had nothing.
async fn poll_envelope(
    channel: &ChannelHandle,
    interval: Duration,
) -> Result<Option<Envelope>, TunnelError> {
    let Some(raw) = channel.receive().await? else {
        tokio::time::sleep(interval).await;
        return Ok(None);
    };
    match Envelope::decode(&raw) {
        Ok(envelope) => Ok(Some(envelope)),
        Err(e) => {
            warn!(error = %e, "Dropping undecodable message");
            Ok(None)
        }
    }
}

/// A live stream as seen by the poll loop.
struct StreamSlot {
    chunks: mpsc::Sender<Vec<u8>>,
    task: AbortHandle,
}

/// Hand `payload` to the stream's task without waiting on its socket.
///
/// A stream whose queue is full is aborted and removed; returns `true` when
/// that happened and the remote side has to be told.
fn queue_chunk(
    streams: &mut HashMap<String, StreamSlot>,
    stream_id: &str,
    payload: Vec<u8>,
) -> bool {
    let Some(slot) = streams.get(stream_id) else {
        debug!(stream = %stream_id, "Data for unknown stream");
        return false;
    };
    match slot.chunks.try_send(payload) {
        Ok(()) => false,
        Err(TrySendError::Full(_)) => {
            warn!(stream = %stream_id, "Stream backlog full, dropping stream");
            if let Some(slot) = streams.remove(stream_id) {
                slot.task.abort();
            }
            true
        }
        Err(TrySendError::Closed(_)) => {
            streams.remove(stream_id);
            false
        }
    }
}

/// Fixed-capacity set of recently closed stream ids, oldest evicted first.
#[derive(Debug)]
struct ClosedStreams {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl ClosedStreams {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn insert(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Host side: forwards streams opened by the remote client to `target`.
pub struct TunnelHost {
    channel: Arc<ChannelHandle>,
    target: String,
    config: ClientConfig,
}

impl TunnelHost {
    pub fn new(channel: ChannelHandle, target: impl Into<String>, config: ClientConfig) -> Self {
        Self {
            channel: Arc::new(channel),
            target: target.into(),
            config,
        }
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// Serve streams until `shutdown` resolves or the broker becomes
    /// unreachable.
    pub async fn run<F>(self, shutdown: F) -> Result<(), TunnelError>
    where
        F: Future<Output = ()>,
    {
        info!(
            channel = %self.channel.id(),
            target = %self.target,
            "Exposing target through broker"
        );
        tokio::pin!(shutdown);

        let mut streams: HashMap<String, StreamSlot> = HashMap::new();
        let mut closed = ClosedStreams::new(CLOSED_STREAM_MEMORY);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();

        let result = loop {
            while let Ok(id) = done_rx.try_recv() {
                streams.remove(&id);
                closed.insert(id);
            }

            let envelope = tokio::select! {
                _ = &mut shutdown => break Ok(()),
                polled = poll_envelope(&self.channel, self.config.poll_interval()) => polled,
            };
            let envelope = match envelope {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(e) => break Err(e),
            };

            if envelope.is_marker() {
                if streams.remove(&envelope.id).is_some() {
                    // Dropping the sender lets the stream flush what is
                    // queued, then close.
                    debug!(stream = %envelope.id, "Remote closed stream");
                    closed.insert(envelope.id);
                } else if !closed.contains(&envelope.id) {
                    let slot = self.open(envelope.id.clone(), done_tx.clone());
                    streams.insert(envelope.id, slot);
                }
                continue;
            }

            let payload = match envelope.payload() {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!(stream = %envelope.id, error = %e, "Dropping corrupt frame");
                    continue;
                }
            };
            if queue_chunk(&mut streams, &envelope.id, payload) {
                send_marker(&self.channel, &envelope.id).await;
                closed.insert(envelope.id);
            }
        };

        for (_, slot) in streams.drain() {
            slot.task.abort();
        }
        result
    }

    /// Dial the target in the background; frames that arrive meanwhile wait
    /// in the stream's queue.
    fn open(&self, stream_id: String, done: mpsc::UnboundedSender<String>) -> StreamSlot {
        let (chunks, queued) = mpsc::channel(STREAM_QUEUE_DEPTH);
        let channel = self.channel.clone();
        let target = self.target.clone();
        let buffer_size = self.config.read_buffer_bytes;

        let task = tokio::spawn(async move {
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(&target)).await {
                Ok(Ok(socket)) => {
                    info!(stream = %stream_id, target = %target, "Opened stream to target");
                    drive_stream(&channel, &stream_id, socket, queued, buffer_size).await;
                }
                Ok(Err(e)) => {
                    warn!(stream = %stream_id, error = %e, "Failed to reach target");
                    send_marker(&channel, &stream_id).await;
                }
                Err(_) => {
                    warn!(stream = %stream_id, target = %target, "Timed out reaching target");
                    send_marker(&channel, &stream_id).await;
                }
            }
            let _ = done.send(stream_id);
        });

        StreamSlot {
            chunks,
            task: task.abort_handle(),
        }
    }
}

type LocalStreams = Arc<Mutex<HashMap<String, StreamSlot>>>;

/// Client side: accepts local connections and carries them to the host.
pub struct TunnelClient {
    channel: Arc<ChannelHandle>,
    config: ClientConfig,
}

impl TunnelClient {
    pub fn new(channel: ChannelHandle, config: ClientConfig) -> Self {
        Self {
            channel: Arc::new(channel),
            config,
        }
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn run<F>(self, addr: &str, shutdown: F) -> Result<(), TunnelError>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections accepted on `listener` until `shutdown` resolves or
    /// the broker becomes unreachable.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), TunnelError>
    where
        F: Future<Output = ()>,
    {
        info!(
            channel = %self.channel.id(),
            addr = %listener.local_addr()?,
            "Waiting for local connections"
        );
        let streams: LocalStreams = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();
        let mut receiver = tokio::spawn(Self::deliver(
            self.channel.clone(),
            streams.clone(),
            self.config.poll_interval(),
        ));
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => break Ok(()),
                delivered = &mut receiver => {
                    break match delivered {
                        Ok(result) => result,
                        Err(e) => Err(TunnelError::Io(std::io::Error::other(e))),
                    };
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let stream_id = uuid::Uuid::new_v4().to_string();
                            info!(stream = %stream_id, peer = %peer, "Local connection accepted");
                            self.start_stream(stream_id, socket, &streams, &mut tasks).await;
                        }
                        Err(e) => break Err(e.into()),
                    }
                }
            }
        };

        receiver.abort();
        tasks.abort_all();
        result
    }

    async fn start_stream(
        &self,
        stream_id: String,
        socket: TcpStream,
        streams: &LocalStreams,
        tasks: &mut JoinSet<()>,
    ) {
        let (chunks, queued) = mpsc::channel(STREAM_QUEUE_DEPTH);
        let channel = self.channel.clone();
        let registry = streams.clone();
        let buffer_size = self.config.read_buffer_bytes;
        let id = stream_id.clone();

        // Registered before the open marker goes out, so no reply can miss it.
        let mut streams = streams.lock().await;
        let task = tasks.spawn(async move {
            let opened = match Envelope::marker(id.as_str()).encode() {
                Ok(frame) => channel.send(frame).await,
                Err(e) => Err(e),
            };
            match opened {
                Ok(()) => drive_stream(&channel, &id, socket, queued, buffer_size).await,
                Err(e) => warn!(stream = %id, error = %e, "Failed to open stream"),
            }
            registry.lock().await.remove(&id);
        });
        streams.insert(stream_id, StreamSlot { chunks, task });
    }

    /// Route host frames to the matching local connection; a marker from the
    /// host closes it.
    async fn deliver(
        channel: Arc<ChannelHandle>,
        streams: LocalStreams,
        interval: Duration,
    ) -> Result<(), TunnelError> {
        loop {
            let Some(envelope) = poll_envelope(&channel, interval).await? else {
                continue;
            };

            if envelope.is_marker() {
                if streams.lock().await.remove(&envelope.id).is_some() {
                    debug!(stream = %envelope.id, "Host closed stream");
                }
                continue;
            }

            let payload = match envelope.payload() {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!(stream = %envelope.id, error = %e, "Dropping corrupt frame");
                    continue;
                }
            };
            let dropped = queue_chunk(&mut *streams.lock().await, &envelope.id, payload);
            if dropped {
                send_marker(&channel, &envelope.id).await;
            }
        }
    }
}
