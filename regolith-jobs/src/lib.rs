#![warn(
    clippy::unwrap_used,
    clippy::cast_lossless,
    clippy::unimplemented,
    clippy::indexing_slicing,
    clippy::expect_used
)]
use std::{
    any, future, pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use bevy::tasks::{TaskPool, TaskPoolBuilder};
use parking_lot::Mutex;

#[cfg(not(target_arch = "wasm32"))]
pub type AsyncReturn<Output> = pin::Pin<Box<dyn future::Future<Output = Output> + Send + 'static>>;
#[cfg(target_arch = "wasm32")]
pub type AsyncReturn<Output> = pin::Pin<Box<dyn future::Future<Output = Output> + 'static>>;

pub trait Job: any::Any + Sized + Send + Sync + 'static {
    type Outcome: any::Any + Send + Sync;

    fn name(&self) -> String;

    fn perform(self) -> AsyncReturn<Self::Outcome>;
}

pub struct JobOutcomePayload {
    pub job_outcome_type_id: any::TypeId,
    pub job_outcome: Box<dyn any::Any + Send + Sync>,
}

/// A fixed size pool of worker threads. Outcomes of spawned jobs are queued
/// until a consumer claims them with [`JobPool::take_next`].
pub struct JobPool {
    pool: TaskPool,
    outcome_tx: async_channel::Sender<JobOutcomePayload>,
    outcome_recv: async_channel::Receiver<JobOutcomePayload>,
    finished: Mutex<Vec<JobOutcomePayload>>,
    in_flight: Arc<AtomicUsize>,
}

impl JobPool {
    pub fn new(name: &str, num_threads: usize) -> Self {
        let (outcome_tx, outcome_recv) = async_channel::unbounded::<JobOutcomePayload>();
        Self {
            pool: TaskPoolBuilder::new()
                .num_threads(num_threads.max(1))
                .thread_name(name.to_string())
                .build(),
            outcome_tx,
            outcome_recv,
            finished: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn thread_num(&self) -> usize {
        self.pool.thread_num()
    }

    /// Number of spawned jobs whose outcome has not been sent yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn spawn<J: Job>(&self, job: J) {
        let outcome_tx = self.outcome_tx.clone();
        let in_flight = self.in_flight.clone();
        in_flight.fetch_add(1, Ordering::AcqRel);
        let job_name = job.name();
        self.pool
            .spawn(async move {
                let instant = instant::Instant::now();
                let outcome = job.perform().await;
                bevy::log::debug!("Completed job '{}' in {:?}", job_name, instant.elapsed());
                in_flight.fetch_sub(1, Ordering::AcqRel);
                if let Err(e) = outcome_tx
                    .send(JobOutcomePayload {
                        job_outcome_type_id: any::TypeId::of::<J>(),
                        job_outcome: Box::new(outcome),
                    })
                    .await
                {
                    bevy::log::error!(
                        "Failed to send result from job {} back to the consumer: {:?}",
                        job_name,
                        e
                    );
                }
            })
            .detach();
    }

    /// Runs the job on the pool and blocks until it is done.
    pub fn run_blocking<J: Job>(&self, job: J) -> Option<J::Outcome> {
        self.pool.scope(|s| s.spawn(job.perform())).pop()
    }

    pub fn take_next<J: Job>(&self) -> Option<J::Outcome> {
        let mut finished = self.finished.lock();
        while let Ok(payload) = self.outcome_recv.try_recv() {
            finished.push(payload);
        }
        let index = finished
            .iter()
            .enumerate()
            .filter(|(_i, outcome_payload)| {
                any::TypeId::of::<J>() == outcome_payload.job_outcome_type_id
                    && outcome_payload.job_outcome.is::<J::Outcome>()
            })
            .map(|(i, _)| i)
            .next()?;
        let outcome_payload = finished.remove(index);
        let outcome = outcome_payload.job_outcome.downcast::<J::Outcome>();
        if outcome.is_err() {
            bevy::log::error!("encountered unexpected job result type");
        }
        outcome.map(|n| *n).ok()
    }
}
