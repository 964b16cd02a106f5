//! # Request Batcher
//!
//! Queues requests and drains them on a fixed tick, dispatching at most
//! `concurrency` of them concurrently. Each settled result goes back to the
//! originator's callback at the same position it was dequeued in. One failure
//! fails the whole batch; retrying is up to the caller.

use crate::config::BatcherConfig;
use crate::error::{BatchError, Result};
use crate::periodic::PeriodicTask;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The collaborator that actually performs a request
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    async fn dispatch(&self, request: Self::Request) -> anyhow::Result<Self::Response>;

    /// Fan one logical request out into the items that get queued
    fn split(&self, request: Self::Request) -> Vec<Self::Request> {
        vec![request]
    }
}

/// Invoked once per queued item with that item's outcome
pub type Callback<R> = Arc<dyn Fn(Result<R>) + Send + Sync>;

struct QueueItem<D: Dispatch> {
    request: D::Request,
    callback: Option<Callback<D::Response>>,
}

struct Inner<D: Dispatch> {
    dispatcher: D,
    concurrency: usize,
    queue: Mutex<VecDeque<QueueItem<D>>>,
}

impl<D: Dispatch> Inner<D> {
    async fn run_once(&self) -> usize {
        let batch: Vec<QueueItem<D>> = {
            let mut queue = self.queue.lock();
            let take = self.concurrency.min(queue.len());
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            return 0;
        }

        let size = batch.len();
        let (requests, callbacks): (Vec<_>, Vec<_>) =
            batch.into_iter().map(|item| (item.request, item.callback)).unzip();

        debug!("Dispatching batch of {} requests", size);
        let results = join_all(requests.into_iter().map(|request| self.dispatcher.dispatch(request))).await;

        match results.into_iter().collect::<anyhow::Result<Vec<_>>>() {
            Ok(responses) => {
                for (callback, response) in callbacks.into_iter().zip(responses) {
                    if let Some(callback) = callback {
                        callback(Ok(response));
                    }
                }
            }
            Err(e) => {
                warn!("Batch of {} requests failed: {}", size, e);
                let err = BatchError::dispatch(e);
                for callback in callbacks.into_iter().flatten() {
                    callback(Err(err.clone()));
                }
            }
        }
        size
    }
}

/// Periodic, concurrency-bounded request queue
pub struct RequestBatcher<D: Dispatch> {
    inner: Arc<Inner<D>>,
    task: PeriodicTask,
}

impl<D: Dispatch> RequestBatcher<D> {
    pub fn new(dispatcher: D, config: &BatcherConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                concurrency: config.concurrency.max(1),
                queue: Mutex::new(VecDeque::new()),
            }),
            task: PeriodicTask::new(config.interval()),
        }
    }

    pub fn dispatcher(&self) -> &D {
        &self.inner.dispatcher
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Queued items not yet dispatched
    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }

    /// Queue a request; `callback` fires once for every item it is split into.
    /// Returns the number of items queued.
    pub fn add<F>(&self, request: D::Request, callback: F) -> usize
    where
        F: Fn(Result<D::Response>) + Send + Sync + 'static,
    {
        self.enqueue(request, Some(Arc::new(callback)))
    }

    /// Queue a request whose outcome nobody waits for
    pub fn add_detached(&self, request: D::Request) -> usize {
        self.enqueue(request, None)
    }

    /// Queue a request and get a ticket resolving to the responses of all its items
    pub fn submit(&self, request: D::Request) -> BatchTicket<D::Response> {
        let (tx, rx) = mpsc::unbounded_channel();
        let parts = self.enqueue(
            request,
            Some(Arc::new(move |result| {
                // The ticket may have been dropped.
                let _ = tx.send(result);
            })),
        );
        BatchTicket { rx, parts }
    }

    fn enqueue(&self, request: D::Request, callback: Option<Callback<D::Response>>) -> usize {
        let items = self.inner.dispatcher.split(request);
        let parts = items.len();
        let mut queue = self.inner.queue.lock();
        queue.extend(items.into_iter().map(|request| QueueItem { request, callback: callback.clone() }));
        debug!("Queued {} items ({} pending)", parts, queue.len());
        parts
    }

    /// One tick: dispatch up to `concurrency` queued items and deliver their results.
    /// Returns how many items were dispatched.
    pub async fn run_once(&self) -> usize {
        self.inner.run_once().await
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Start ticking in the background
    pub fn start(&self) {
        let inner = Arc::clone(&self.inner);
        info!("Starting request batcher (concurrency: {})", inner.concurrency);
        self.task.start(move || {
            let inner = Arc::clone(&inner);
            async move {
                inner.run_once().await;
            }
        });
    }

    /// Stop ticking; a batch in flight still settles. Queued items stay queued.
    pub async fn stop(&self) {
        self.task.stop().await;
        info!("Request batcher stopped ({} items still queued)", self.len());
    }
}

/// Awaitable outcome of [`RequestBatcher::submit`]
pub struct BatchTicket<R> {
    rx: mpsc::UnboundedReceiver<Result<R>>,
    parts: usize,
}

impl<R> BatchTicket<R> {
    /// Number of queued items the request was split into
    pub fn parts(&self) -> usize {
        self.parts
    }

    /// Responses of every item in queue order, or the first batch error
    pub async fn wait(mut self) -> Result<Vec<R>> {
        let mut responses = Vec::with_capacity(self.parts);
        while responses.len() < self.parts {
            match self.rx.recv().await {
                Some(result) => responses.push(result?),
                None => return Err(BatchError::Closed),
            }
        }
        Ok(responses)
    }
}
