//! Background loader pool
//!
//! Workers on a dedicated tokio runtime drain a bounded request queue. Each
//! request reads a node's hierarchy fragment and/or point file and sends the
//! decoded result back as a [`LoaderEvent`]. Workers never see the tree;
//! the owner of the tree applies completions on its own thread.

use crate::core::config::StreamingConfig;
use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::octree::hierarchy::{decode_hierarchy, HierarchyFragment};
use crate::octree::info::GlobalInfo;
use crate::octree::key::NodeKey;
use crate::octree::node::NodeId;
use crate::octree::point_data::{decode_points, PointBuffers};
use crate::octree::tree::Octree;
use crate::streaming::disk_io::read_node_file_async;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// What a request reads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadKind {
    /// First load of a node's payload
    Data,
    /// Reload of a dirty node into its update shadow
    Refresh,
    /// Forced re-read of a hierarchy fragment only
    Hierarchy,
}

/// Request to load one node
#[derive(Clone, Debug)]
pub struct LoadRequest {
    /// Tree generation the node id belongs to
    pub epoch: u64,
    pub node: NodeId,
    pub key: NodeKey,
    pub kind: LoadKind,
    /// Read the node's hierarchy fragment before its points
    pub with_hierarchy: bool,
    /// Dequantization origin, the node's bounding box minimum
    pub origin: Vec3,
    pub info: Arc<GlobalInfo>,
}

impl LoadRequest {
    /// Build a request for `id` from the tree's current state
    pub fn for_node(tree: &Octree, id: NodeId, kind: LoadKind, with_hierarchy: bool) -> Self {
        let node = tree.node(id);
        Self {
            epoch: tree.epoch(),
            node: id,
            key: node.key().clone(),
            kind,
            with_hierarchy: with_hierarchy || kind == LoadKind::Hierarchy,
            origin: node.bounding_box().min,
            info: tree.info().clone(),
        }
    }
}

/// Outcome of a request
///
/// Each part is `None` if it was not requested.
#[derive(Debug)]
pub struct LoadResult {
    pub epoch: u64,
    pub node: NodeId,
    pub key: NodeKey,
    pub kind: LoadKind,
    pub hierarchy: Option<Result<HierarchyFragment>>,
    pub points: Option<Result<PointBuffers>>,
    pub elapsed: Duration,
}

/// Progress reported by the workers
#[derive(Debug)]
pub enum LoaderEvent {
    /// A worker took the request off the queue
    Started { epoch: u64, node: NodeId, kind: LoadKind },
    Completed(LoadResult),
}

/// A request the pool did not accept, handed back to the caller
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("load queue is full ({capacity} requests)")]
    QueueFull { request: Box<LoadRequest>, capacity: usize },

    #[error("loader pool has shut down")]
    Closed(Box<LoadRequest>),
}

impl SubmitError {
    pub fn into_request(self) -> LoadRequest {
        match self {
            SubmitError::QueueFull { request, .. } | SubmitError::Closed(request) => *request,
        }
    }
}

impl From<SubmitError> for Error {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::QueueFull { .. } => Error::QueueFull,
            SubmitError::Closed(_) => Error::LoaderClosed,
        }
    }
}

/// Anything that accepts load requests without blocking
pub trait LoadSink {
    /// Queue a request, or hand it back if it cannot be queued now
    fn try_submit(&mut self, request: LoadRequest) -> std::result::Result<(), SubmitError>;
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<LoadRequest>>>;

/// Fixed pool of loader workers behind a bounded queue
pub struct LoaderPool {
    /// Dedicated runtime; `None` after shutdown
    runtime: Option<Runtime>,
    /// Request queue; `None` once closed
    request_tx: Option<mpsc::Sender<LoadRequest>>,
    event_rx: mpsc::UnboundedReceiver<LoaderEvent>,
    /// `true` while workers may take requests
    gate: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    /// Requests accepted whose completion has not been polled yet
    outstanding: usize,
    capacity: usize,
}

impl LoaderPool {
    /// Start `config.loader_threads` workers behind a queue of
    /// `config.load_queue_capacity` requests
    pub fn new(config: &StreamingConfig) -> Result<Self> {
        config.validate()?;
        let threads = config.loader_threads;
        let capacity = config.load_queue_capacity;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .thread_name("pointstream-loader")
            .enable_all()
            .build()?;

        let (request_tx, request_rx) = mpsc::channel::<LoadRequest>(capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<LoaderEvent>();
        let (gate, _) = watch::channel(!config.start_loader_paused);
        let request_rx: SharedReceiver = Arc::new(Mutex::new(request_rx));

        let workers = (0..threads)
            .map(|worker| {
                runtime.spawn(worker_loop(
                    worker,
                    request_rx.clone(),
                    event_tx.clone(),
                    gate.subscribe(),
                ))
            })
            .collect();

        log::info!(
            "Loader pool started: {threads} workers, queue capacity {capacity}{}",
            if config.start_loader_paused { " (paused)" } else { "" }
        );

        Ok(Self {
            runtime: Some(runtime),
            request_tx: Some(request_tx),
            event_rx,
            gate,
            workers,
            outstanding: 0,
            capacity,
        })
    }

    /// Queue a request, waiting for room if the queue is full
    ///
    /// Must not be called from inside an async context. Blocks forever if
    /// the pool is paused with a full queue.
    pub fn submit(&mut self, request: LoadRequest) -> std::result::Result<(), SubmitError> {
        let Some(tx) = &self.request_tx else {
            return Err(SubmitError::Closed(Box::new(request)));
        };
        tx.blocking_send(request)
            .map_err(|mpsc::error::SendError(request)| SubmitError::Closed(Box::new(request)))?;
        self.outstanding += 1;
        Ok(())
    }

    /// Drain all available events without blocking
    pub fn poll_events(&mut self) -> Vec<LoaderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            self.track(&event);
            events.push(event);
        }
        events
    }

    /// Wait up to `timeout` for the next event
    pub fn wait_event(&mut self, timeout: Duration) -> Option<LoaderEvent> {
        let event = match &self.runtime {
            Some(runtime) => {
                let rx = &mut self.event_rx;
                runtime
                    .block_on(async move { tokio::time::timeout(timeout, rx.recv()).await })
                    .ok()
                    .flatten()
            }
            None => self.event_rx.try_recv().ok(),
        };
        if let Some(event) = &event {
            self.track(event);
        }
        event
    }

    fn track(&mut self, event: &LoaderEvent) {
        if let LoaderEvent::Completed(result) = event {
            self.outstanding = self.outstanding.saturating_sub(1);
            log::trace!("Load of {} finished in {:?}", result.key, result.elapsed);
        }
    }

    /// Stop workers from taking new requests
    ///
    /// Requests already taken still complete.
    pub fn pause(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume(&self) {
        self.gate.send_replace(true);
    }

    pub fn is_paused(&self) -> bool {
        !*self.gate.borrow()
    }

    /// Requests waiting in the queue
    pub fn queue_len(&self) -> usize {
        self.request_tx
            .as_ref()
            .map_or(0, |tx| self.capacity - tx.capacity())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Requests accepted whose completion has not been received
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_closed(&self) -> bool {
        self.request_tx.is_none()
    }

    /// Close the queue, let the workers drain it and wait for them
    ///
    /// Events of the drained requests stay available to [`poll_events`].
    ///
    /// [`poll_events`]: LoaderPool::poll_events
    pub fn shutdown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.request_tx = None;
        self.resume();

        let workers = std::mem::take(&mut self.workers);
        runtime.block_on(async {
            for worker in workers {
                if let Err(e) = worker.await {
                    log::warn!("Loader worker failed: {e}");
                }
            }
        });
        log::info!("Loader pool shut down, {} events pending", self.outstanding);
    }
}

impl LoadSink for LoaderPool {
    fn try_submit(&mut self, request: LoadRequest) -> std::result::Result<(), SubmitError> {
        let Some(tx) = &self.request_tx else {
            return Err(SubmitError::Closed(Box::new(request)));
        };
        match tx.try_send(request) {
            Ok(()) => {
                self.outstanding += 1;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(request)) => Err(SubmitError::QueueFull {
                request: Box::new(request),
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(request)) => {
                Err(SubmitError::Closed(Box::new(request)))
            }
        }
    }
}

impl Drop for LoaderPool {
    fn drop(&mut self) {
        // Workers see a closed queue; the runtime cancels them when dropped
        self.request_tx = None;
        self.gate.send_replace(true);
    }
}

/// Wait until the gate is open; false if the pool is gone
async fn wait_open(gate: &mut watch::Receiver<bool>) -> bool {
    gate.wait_for(|open| *open).await.is_ok()
}

async fn worker_loop(
    worker: usize,
    requests: SharedReceiver,
    events: mpsc::UnboundedSender<LoaderEvent>,
    mut gate: watch::Receiver<bool>,
) {
    loop {
        if !wait_open(&mut gate).await {
            break;
        }
        let request = {
            let mut rx = requests.lock().await;
            rx.recv().await
        };
        let Some(request) = request else {
            break;
        };
        // paused while waiting on the queue
        if !wait_open(&mut gate).await {
            break;
        }

        log::trace!("Worker {worker} loading {} ({:?})", request.key, request.kind);
        let started = LoaderEvent::Started {
            epoch: request.epoch,
            node: request.node,
            kind: request.kind,
        };
        if events.send(started).is_err() {
            break;
        }
        let result = run_request(request).await;
        if events.send(LoaderEvent::Completed(result)).is_err() {
            break;
        }
    }
    log::debug!("Loader worker {worker} exiting");
}

/// Read the requested parts of one node, hierarchy first
async fn run_request(request: LoadRequest) -> LoadResult {
    let start = Instant::now();
    let LoadRequest { epoch, node, key, kind, with_hierarchy, origin, info } = request;

    let hierarchy = if with_hierarchy {
        Some(read_fragment(&info, &key).await)
    } else {
        None
    };
    let points = if kind != LoadKind::Hierarchy {
        Some(read_points(&info, &key, origin).await)
    } else {
        None
    };

    LoadResult {
        epoch,
        node,
        key,
        kind,
        hierarchy,
        points,
        elapsed: start.elapsed(),
    }
}

async fn read_fragment(info: &GlobalInfo, key: &NodeKey) -> Result<HierarchyFragment> {
    let bytes = read_node_file_async(&info.hierarchy_file(key)).await?;
    decode_hierarchy(key, &bytes)
}

async fn read_points(info: &GlobalInfo, key: &NodeKey, origin: Vec3) -> Result<PointBuffers> {
    let bytes = read_node_file_async(&info.data_file(key)).await?;
    Ok(decode_points(&bytes, &info.layout, info.scale, origin))
}

/// In-memory sink for driving the scheduler without threads
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub struct RecordingSink {
        pub accepted: Vec<LoadRequest>,
        pub capacity: usize,
    }

    impl RecordingSink {
        pub fn new(capacity: usize) -> Self {
            Self { accepted: Vec::new(), capacity }
        }

        pub fn keys(&self) -> Vec<String> {
            self.accepted.iter().map(|r| r.key.to_string()).collect()
        }
    }

    impl LoadSink for RecordingSink {
        fn try_submit(&mut self, request: LoadRequest) -> std::result::Result<(), SubmitError> {
            if self.accepted.len() >= self.capacity {
                return Err(SubmitError::QueueFull {
                    request: Box::new(request),
                    capacity: self.capacity,
                });
            }
            self.accepted.push(request);
            Ok(())
        }
    }

    /// Run a request on the calling thread, as a worker would
    pub fn complete(request: LoadRequest) -> LoadResult {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_request(request))
    }
}
