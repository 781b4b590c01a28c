//! Coordinator/worker evaluation pool.
//!
//! Each worker owns a request channel and shares one response channel with
//! the coordinator. The coordinator hands positions to idle workers, collects
//! the answers in input order and blocks until the whole batch is back.
//! Workers never talk to each other and exit on [`Request::Stop`], which the
//! pool sends when it is dropped.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{Evaluation, LogDensity};
use crate::sampler::Executor;

#[derive(Debug)]
pub enum Request {
    Evaluate { index: usize, position: Vec<f64> },
    Stop,
}

#[derive(Debug)]
struct Response {
    worker: usize,
    index: usize,
    result: Result<Evaluation>,
}

struct Worker {
    requests: Sender<Request>,
    handle: Option<JoinHandle<()>>,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    responses: Receiver<Response>,
    dim: usize,
}

fn worker_loop<D: LogDensity>(
    id: usize,
    density: Arc<D>,
    requests: Receiver<Request>,
    responses: Sender<Response>,
) {
    debug!(worker = id, "worker started");
    while let Ok(Request::Evaluate { index, position }) = requests.recv() {
        let result = catch_unwind(AssertUnwindSafe(|| density.log_prob(&position)))
            .unwrap_or_else(|_| {
                Err(Error::WorkerPool(format!(
                    "worker {} panicked while evaluating walker {}",
                    id, index
                )))
            });
        let response = Response {
            worker: id,
            index,
            result,
        };
        if responses.send(response).is_err() {
            break;
        }
    }
    debug!(worker = id, "worker stopped");
}

impl WorkerPool {
    pub fn new<D: LogDensity>(density: Arc<D>, num_workers: usize) -> Result<Self> {
        let (response_tx, responses) = channel();
        let dim = density.dim();
        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers.max(1) {
            let (requests, request_rx) = channel();
            let density = density.clone();
            let response_tx = response_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("uvlens-worker-{}", id))
                .spawn(move || worker_loop(id, density, request_rx, response_tx))
                .map_err(|e| Error::WorkerPool(format!("could not start worker {}: {}", id, e)))?;
            workers.push(Worker {
                requests,
                handle: Some(handle),
            });
        }
        info!(workers = workers.len(), "started worker pool");
        Ok(Self {
            workers,
            responses,
            dim,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    fn dispatch(&self, worker: usize, index: usize, position: &[f64]) -> Result<()> {
        self.workers[worker]
            .requests
            .send(Request::Evaluate {
                index,
                position: position.to_vec(),
            })
            .map_err(|_| Error::WorkerPool(format!("worker {} is gone", worker)))
    }

    /// Stop all workers and wait for them to exit.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        for worker in &self.workers {
            // A worker that already exited has dropped its receiver.
            let _ = worker.requests.send(Request::Stop);
        }
        let mut failed = 0;
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(Error::WorkerPool(format!("{} workers panicked", failed)));
        }
        Ok(())
    }
}

impl Executor for WorkerPool {
    fn dim(&self) -> usize {
        self.dim
    }

    fn evaluate_batch(&mut self, positions: &[Vec<f64>]) -> Result<Vec<Evaluation>> {
        let mut results: Vec<Option<Evaluation>> = vec![None; positions.len()];
        let mut pending = positions.iter().enumerate();
        let mut idle: VecDeque<usize> = (0..self.workers.len()).collect();
        let mut outstanding = 0;
        let mut first_error = None;

        loop {
            while first_error.is_none() {
                let Some(&worker) = idle.front() else { break };
                let Some((index, position)) = pending.next() else { break };
                idle.pop_front();
                self.dispatch(worker, index, position)?;
                outstanding += 1;
            }
            if outstanding == 0 {
                break;
            }
            let response = self
                .responses
                .recv()
                .map_err(|_| Error::WorkerPool("all workers are gone".into()))?;
            outstanding -= 1;
            idle.push_back(response.worker);
            match response.result {
                Ok(evaluation) => results[response.index] = Some(evaluation),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.ok_or_else(|| Error::WorkerPool(format!("no result for walker {}", i))))
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            debug!(error = %e, "worker pool shut down with errors");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::tests::{start, Normal};
    use crate::sampler::{EnsembleSampler, StretchMove, ThreadExecutor};
    use pretty_assertions::assert_eq;

    struct Panicky;

    impl LogDensity for Panicky {
        fn dim(&self) -> usize {
            1
        }

        fn log_prob(&self, position: &[f64]) -> Result<Evaluation> {
            if position[0] < 0. {
                panic!("negative");
            }
            Ok(Evaluation {
                log_prob: 0.,
                derived: vec![],
            })
        }
    }

    #[test]
    fn batch_results_in_input_order() {
        let mut pool = WorkerPool::new(Arc::new(Normal { dim: 2 }), 3).unwrap();
        assert_eq!(pool.num_workers(), 3);
        let positions = start(10, 2);
        let results = pool.evaluate_batch(&positions).unwrap();
        for (p, r) in positions.iter().zip(&results) {
            assert_eq!(r.derived, vec![p[0] + p[1]]);
        }
        assert!(pool.evaluate_batch(&[]).unwrap().is_empty());
        pool.shutdown().unwrap();
    }

    #[test]
    fn same_chain_as_thread_mode() {
        let density = Arc::new(Normal { dim: 3 });
        let pool = WorkerPool::new(density.clone(), 3).unwrap();
        let threads = ThreadExecutor::new(density, 2).unwrap();

        let mut a = EnsembleSampler::new(pool, StretchMove::default(), 11, start(8, 3)).unwrap();
        let mut b = EnsembleSampler::new(threads, StretchMove::default(), 11, start(8, 3)).unwrap();
        for _ in 0..40 {
            a.step().unwrap();
            b.step().unwrap();
        }
        assert_eq!(a.state(), b.state());
        a.into_executor().shutdown().unwrap();
    }

    #[test]
    fn panicking_worker_is_reported() {
        let mut pool = WorkerPool::new(Arc::new(Panicky), 2).unwrap();
        let result = pool.evaluate_batch(&[vec![1.], vec![-1.], vec![2.]]);
        assert!(matches!(result, Err(Error::WorkerPool(_))));
        // The pool stays usable after a failed batch.
        let ok = pool.evaluate_batch(&[vec![1.], vec![3.]]).unwrap();
        assert_eq!(ok.len(), 2);
    }
}
