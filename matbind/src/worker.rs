//! Numeric work off the host thread
//!
//! Workers never see a [`BufferOwner`](crate::buffer::BufferOwner). The host
//! thread copies the region it wants processed into a [`MatSnapshot`], the
//! job runs on the rayon pool, and its output waits on a channel until the
//! host thread drains it. Reference counts and live storage are therefore
//! only ever touched from the host thread.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crossbeam_channel::{unbounded, Receiver, Sender};
use matbind_core::{with_element, ElementType, MatrixElement};
use rayon::prelude::*;

/// Identifier handed back to the host for a queued job
pub type TaskId = u64;

/// Type-erased job output, downcast by the completion callback
pub type WorkOutput = Box<dyn Any + Send>;

/// Packed, owned copy of a matrix region
#[derive(Debug, Clone, PartialEq)]
pub struct MatSnapshot {
    rows: usize,
    cols: usize,
    elem: ElementType,
    data: Vec<u8>,
}

/// Summary statistics over every element, widened to `f64`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Stats {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl Stats {
    fn empty() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::NAN,
            max: f64::NAN,
            mean: f64::NAN,
        }
    }

    fn merge(self, other: Stats) -> Stats {
        if self.count == 0 {
            return other;
        }
        if other.count == 0 {
            return self;
        }
        let count = self.count + other.count;
        let sum = self.sum + other.sum;
        Stats {
            count,
            sum,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
            mean: sum / count as f64,
        }
    }
}

impl MatSnapshot {
    pub fn new(rows: usize, cols: usize, elem: ElementType, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), rows * cols * elem.size_bytes());
        Self {
            rows,
            cols,
            elem,
            data,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn elem_type(&self) -> ElementType {
        self.elem
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Sum, min, max and mean, one rayon task per row
    pub fn stats(&self) -> Stats {
        let row_bytes = self.cols * self.elem.size_bytes();
        if row_bytes == 0 || self.rows == 0 {
            return Stats::empty();
        }
        let elem = self.elem;
        self.data
            .par_chunks(row_bytes)
            .map(|row| row_stats(elem, row))
            .reduce(Stats::empty, Stats::merge)
    }
}

fn row_stats(elem: ElementType, row: &[u8]) -> Stats {
    with_element!(elem, |E| {
        row.chunks_exact(std::mem::size_of::<E>())
            .map(|slot| bytemuck::pod_read_unaligned::<E>(slot).to_f64())
            .fold(Stats::empty(), |acc, v| {
                acc.merge(Stats {
                    count: 1,
                    sum: v,
                    min: v,
                    max: v,
                    mean: v,
                })
            })
    })
}

/// Message from a worker back to the host thread
pub(crate) struct Finished {
    pub task: TaskId,
    pub output: Result<WorkOutput, String>,
}

/// Lazily built rayon pool plus the completion channel
pub struct WorkerPool {
    threads: usize,
    pool: Option<rayon::ThreadPool>,
    next_task: TaskId,
    tx: Sender<Finished>,
    rx: Receiver<Finished>,
}

impl WorkerPool {
    /// `threads == 0` lets rayon pick the thread count
    pub fn new(threads: usize) -> Self {
        let (tx, rx) = unbounded();
        Self {
            threads,
            pool: None,
            next_task: 1,
            tx,
            rx,
        }
    }

    /// Run `job` on a worker thread; its output is delivered on the channel
    pub fn submit<F>(&mut self, job: F) -> Result<TaskId, rayon::ThreadPoolBuildError>
    where
        F: FnOnce() -> WorkOutput + Send + 'static,
    {
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .thread_name(|index| format!("matbind-worker-{index}"))
                .build()?,
        };
        let task = self.next_task;
        self.next_task += 1;

        let tx = self.tx.clone();
        pool.spawn(move || {
            let output = catch_unwind(AssertUnwindSafe(job)).map_err(|panic| panic_message(&*panic));
            // receiver lives as long as the pool's owner; a closed channel means shutdown
            let _ = tx.send(Finished { task, output });
        });
        self.pool = Some(pool);
        tracing::debug!(task, "queued worker job");
        Ok(task)
    }

    /// Finished jobs available right now
    pub(crate) fn try_finished(&self) -> Vec<Finished> {
        self.rx.try_iter().collect()
    }

    /// Block until the next job finishes
    pub(crate) fn wait_finished(&self) -> Option<Finished> {
        self.rx.recv().ok()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker job panicked".to_string()
    }
}
