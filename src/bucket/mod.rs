//! Token bucket that gates the asset pipeline.
//!
//! Tokens ("drops") are added by a background refill loop every `period`
//! and removed one at a time by consumers. Waiting consumers are served in
//! FIFO order.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument};


#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("invalid bucket config: {0}")]
    InvalidConfig(String),
    #[error("bucket refill is already running")]
    AlreadyStarted,
    #[error("bucket refill is stopped")]
    Stopped,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BucketConfig {
    /// Capacity of the bucket.
    pub size: usize,
    /// Drops added on every refill tick, clamped at `size`.
    pub refill: usize,
    pub period: Duration,
}

impl BucketConfig {
    pub fn new(size: usize, refill: usize, period: Duration) -> Self {
        Self {
            size,
            refill,
            period,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        if self.size < 1 {
            return Err(Error::InvalidConfig(format!(
                "size must be at least 1, got {}",
                self.size
            )));
        }

        if self.size > Semaphore::MAX_PERMITS {
            return Err(Error::InvalidConfig(format!(
                "size must not exceed {}, got {}",
                Semaphore::MAX_PERMITS,
                self.size
            )));
        }

        if self.refill < 1 {
            return Err(Error::InvalidConfig(format!(
                "refill must be at least 1, got {}",
                self.refill
            )));
        }

        if self.period.is_zero() {
            return Err(Error::InvalidConfig("period must be positive".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug)]
struct Drops {
    config: BucketConfig,
    semaphore: Semaphore,
    // serializes additions so the clamp at `size` can't be overshot
    fill_lock: Mutex<()>,
}

impl Drops {
    fn fill(&self, amount: usize) -> usize {
        let _guard = self.fill_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let room = self
            .config
            .size
            .saturating_sub(self.semaphore.available_permits());
        let added = amount.min(room);
        if added > 0 {
            self.semaphore.add_permits(added);
        }

        added
    }
}

#[derive(Debug)]
enum State {
    Fresh,
    Running { _stop_sender: flume::Sender<()> },
    Stopped,
}

#[derive(Debug)]
pub struct Bucket {
    drops: Arc<Drops>,
    state: Mutex<State>,
}

impl Bucket {
    /// Creates an empty bucket, the refill loop is not started.
    pub fn new(config: BucketConfig) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            drops: Arc::new(Drops {
                config,
                semaphore: Semaphore::new(0),
                fill_lock: Mutex::new(()),
            }),
            state: Mutex::new(State::Fresh),
        })
    }

    pub fn config(&self) -> &BucketConfig {
        &self.drops.config
    }

    /// Spawns the refill loop on the current tokio runtime.
    ///
    /// The first refill happens one full period after this call.
    #[instrument(skip(self), fields(config = ?self.drops.config))]
    pub fn start(&self) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match *state {
            State::Running { .. } => return Err(Error::AlreadyStarted),
            State::Stopped => return Err(Error::Stopped),
            State::Fresh => {}
        }

        let (stop_sender, stop_receiver) = flume::bounded(0);
        tokio::spawn(refill_loop(self.drops.clone(), stop_receiver));

        *state = State::Running {
            _stop_sender: stop_sender,
        };

        info!("start bucket refill done");

        Ok(())
    }

    /// Halts the refill loop. Calling it on a bucket that is not running
    /// does nothing.
    ///
    /// Consumers waiting in [`Bucket::take`] are not woken.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if matches!(*state, State::Running { .. }) {
            // dropping the sender closes the signal channel
            *state = State::Stopped;

            info!("stop bucket refill done");
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            State::Running { .. }
        )
    }

    /// Waits until a drop is available and removes it.
    pub async fn take(&self) {
        match self.drops.semaphore.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => unreachable!("bucket semaphore is never closed"),
        }
    }

    pub fn try_take(&self) -> bool {
        match self.drops.semaphore.try_acquire() {
            Ok(permit) => {
                permit.forget();

                true
            }

            Err(_) => false,
        }
    }

    pub fn add_drops(&self) {
        let added = self.drops.fill(self.drops.config.refill);

        debug!(added, "add drops done");
    }

    pub fn top_up(&self) {
        let added = self.drops.fill(self.drops.config.size);

        debug!(added, "top up bucket done");
    }

    /// Current number of drops. The value may be stale as soon as it is
    /// returned.
    pub fn available(&self) -> usize {
        self.drops.semaphore.available_permits()
    }

    pub fn is_full(&self) -> bool {
        self.available() == self.drops.config.size
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }
}

async fn refill_loop(drops: Arc<Drops>, stop_receiver: flume::Receiver<()>) {
    let period = drops.config.period;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let added = drops.fill(drops.config.refill);

                debug!(added, "refill bucket done");
            }

            _ = stop_receiver.recv_async() => {
                info!("bucket refill loop exit");

                return;
            }
        }
    }
}
