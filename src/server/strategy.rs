//! Concurrency strategies for answering calls.
//!
//! Every strategy ends a call the same way: send the reply (if the caller
//! wants one), then release the inbound call. Workers are always supervised
//! so shutdown can wait for them.

use std::sync::Arc;
use std::thread::JoinHandle as ThreadHandle;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::handler::Router;
use crate::error::MethodError;
use crate::message::{MethodCall, MethodReply, Reply, ReplyTo};
use crate::writer::WriterHandle;

/// Default bound on concurrently running handlers in [`Strategy::TaskPool`].
pub const DEFAULT_MAX_CONCURRENT: usize = 256;

/// How a server executes the calls it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Strategy {
    /// Handle each call on the accept loop; strict FIFO.
    Serial,
    /// One OS thread per call, joined at shutdown.
    ThreadPerRequest,
    /// Run handlers on the blocking pool, at most `max_concurrent` at a time.
    TaskPool {
        /// Concurrency bound; the accept loop waits for a slot when reached.
        #[serde(default = "default_max_concurrent")]
        max_concurrent: usize,
    },
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::TaskPool {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl Strategy {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Serial => "serial",
            Strategy::ThreadPerRequest => "thread-per-request",
            Strategy::TaskPool { .. } => "task-pool",
        }
    }
}

/// Running state of a strategy inside the accept loop.
pub(crate) enum Executor {
    Serial,
    Threads {
        live: Vec<ThreadHandle<()>>,
        next_id: u64,
    },
    Pool {
        tasks: JoinSet<()>,
        slots: Arc<Semaphore>,
    },
}

impl Executor {
    pub(crate) fn new(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Serial => Executor::Serial,
            Strategy::ThreadPerRequest => Executor::Threads {
                live: Vec::new(),
                next_id: 0,
            },
            Strategy::TaskPool { max_concurrent } => Executor::Pool {
                tasks: JoinSet::new(),
                slots: Arc::new(Semaphore::new(max_concurrent.max(1))),
            },
        }
    }

    /// Number of workers that have not been reaped yet.
    pub(crate) fn live(&self) -> usize {
        match self {
            Executor::Serial => 0,
            Executor::Threads { live, .. } => live.len(),
            Executor::Pool { tasks, .. } => tasks.len(),
        }
    }

    /// Execute one call.
    pub(crate) async fn execute(
        &mut self,
        call: MethodCall,
        router: &Arc<Router>,
        writer: &WriterHandle,
    ) {
        match self {
            Executor::Serial => {
                let reply = router.dispatch(&call);
                if call.expects_reply() {
                    deliver(writer, &call.reply_to(), reply).await;
                }
                drop(call);
            }

            Executor::Threads { live, next_id } => {
                reap_threads(live);

                // Shared so a failed spawn still leaves the call here.
                let call = Arc::new(call);
                let worker_call = call.clone();
                let router = router.clone();
                let thread_writer = writer.clone();

                *next_id += 1;
                let spawned = std::thread::Builder::new()
                    .name(format!("busrpc-worker-{next_id}"))
                    .spawn(move || {
                        let reply = router.dispatch(&worker_call);
                        if worker_call.expects_reply() {
                            let reply = Reply::to(&worker_call.reply_to(), reply);
                            if let Err(e) = thread_writer.blocking_send(reply) {
                                tracing::error!("Failed to queue reply: {}", e);
                            }
                        }
                        drop(worker_call);
                    });

                match spawned {
                    Ok(handle) => live.push(handle),
                    Err(e) => {
                        tracing::error!("Failed to spawn worker thread: {}", e);
                        if call.expects_reply() {
                            let reply = MethodReply::Error(MethodError::failed(format!(
                                "cannot start worker: {e}"
                            )));
                            deliver(writer, &call.reply_to(), reply).await;
                        }
                    }
                }
                drop(call);
            }

            Executor::Pool { tasks, slots } => {
                while let Some(done) = tasks.try_join_next() {
                    if let Err(e) = done {
                        tracing::error!("Worker task failed: {}", e);
                    }
                }

                // Wait for a free slot rather than dropping the call.
                let Ok(permit) = slots.clone().acquire_owned().await else {
                    tracing::error!("Worker pool closed, dropping call {}", call.member);
                    return;
                };

                let call = Arc::new(call);
                let router = router.clone();
                let writer = writer.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    let worker_call = call.clone();

                    let outcome =
                        tokio::task::spawn_blocking(move || router.dispatch(&worker_call)).await;
                    let reply = match outcome {
                        Ok(reply) => reply,
                        Err(e) => {
                            tracing::error!("Handler task failed: {}", e);
                            MethodReply::Error(MethodError::failed(format!(
                                "handler task failed: {e}"
                            )))
                        }
                    };

                    if call.expects_reply() {
                        deliver(&writer, &call.reply_to(), reply).await;
                    }
                    drop(call);
                });
            }
        }
    }

    /// Wait for every live worker. Returns how many were still running.
    pub(crate) async fn drain(self) -> usize {
        match self {
            Executor::Serial => 0,

            Executor::Threads { live, .. } => {
                let count = live.len();
                let joined = tokio::task::spawn_blocking(move || {
                    for handle in live {
                        if handle.join().is_err() {
                            tracing::error!("Worker thread panicked");
                        }
                    }
                })
                .await;
                if let Err(e) = joined {
                    tracing::error!("Failed to join worker threads: {}", e);
                }
                count
            }

            Executor::Pool { mut tasks, .. } => {
                let count = tasks.len();
                while let Some(done) = tasks.join_next().await {
                    if let Err(e) = done {
                        tracing::error!("Worker task failed: {}", e);
                    }
                }
                count
            }
        }
    }
}

/// Join finished threads, keep the rest.
fn reap_threads(live: &mut Vec<ThreadHandle<()>>) {
    let (finished, running): (Vec<_>, Vec<_>) =
        std::mem::take(live).into_iter().partition(|h| h.is_finished());
    *live = running;

    for handle in finished {
        if handle.join().is_err() {
            tracing::error!("Worker thread panicked");
        }
    }
}

async fn deliver(writer: &WriterHandle, reply_to: &ReplyTo, body: MethodReply) {
    if let Err(e) = writer.send(Reply::to(reply_to, body)).await {
        tracing::error!(
            "Failed to queue reply to {:?} (serial {}): {}",
            reply_to.sender,
            reply_to.serial,
            e
        );
    }
}
