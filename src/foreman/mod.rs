use flume::{Receiver, Sender};
use tracing::{debug, info, instrument, warn};

use crate::bucket::Bucket;
use crate::file_event_produce::AssetEvent;


#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ForemanReport {
    pub forwarded: usize,
}

/// Pumps asset events from a job queue to the worker queue, taking one
/// drop from the bucket per event.
#[derive(Debug)]
pub struct Foreman<'a> {
    bucket: &'a Bucket,
    job_queue: Option<Receiver<AssetEvent>>,
    worker_sender: Sender<AssetEvent>,
    worker_receiver: Receiver<AssetEvent>,
}

impl<'a> Foreman<'a> {
    pub fn new(bucket: &'a Bucket) -> Self {
        // rendezvous channel, at most one event is in flight
        let (worker_sender, worker_receiver) = flume::bounded(0);

        Self {
            bucket,
            job_queue: None,
            worker_sender,
            worker_receiver,
        }
    }

    pub fn bind_job_queue(&mut self, job_queue: Receiver<AssetEvent>) {
        self.job_queue = Some(job_queue);
    }

    pub fn worker_queue(&self) -> Receiver<AssetEvent> {
        self.worker_receiver.clone()
    }

    /// Forwards events until the job queue closes, then closes the worker
    /// queue.
    ///
    /// Blocks while the worker queue has no reader ready, that is the only
    /// backpressure towards the job queue.
    #[instrument(skip(self))]
    pub async fn run(self) -> ForemanReport {
        let Foreman {
            bucket,
            job_queue,
            worker_sender,
            worker_receiver,
        } = self;
        drop(worker_receiver);

        let job_queue = match job_queue {
            None => {
                warn!("no job queue is bound, close worker queue");

                return ForemanReport::default();
            }

            Some(job_queue) => job_queue,
        };

        let mut report = ForemanReport::default();
        while let Ok(job) = job_queue.recv_async().await {
            bucket.take().await;

            debug!(%job, available = bucket.available(), "take drop done");

            if worker_sender.send_async(job).await.is_err() {
                warn!("worker queue has no receiver, stop issuing work");

                return report;
            }

            report.forwarded += 1;
        }

        info!(forwarded = report.forwarded, "job queue is closed, close worker queue");

        report
    }
}
