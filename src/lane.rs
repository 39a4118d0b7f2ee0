//! Relay Lane Module
//!
//! A lane is a single tokio task that owns some state and runs submitted jobs
//! against it one at a time, in submission order. The relay client is not
//! safe for concurrent use and the endpoint caches must be read consistently,
//! so everything touching either is funnelled through one lane.

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::EndpointError;

type LaneJob<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send>;

fn job<S, F>(f: F) -> LaneJob<S>
where
    F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

/// Handle on a lane task. Cloning the handle shares the same lane.
pub struct RelayLane<S> {
    jobs: mpsc::UnboundedSender<LaneJob<S>>,
}

impl<S> Clone for RelayLane<S> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
        }
    }
}

impl<S: Send + 'static> RelayLane<S> {
    /// Spawns the lane task. Must be called from within a tokio runtime.
    ///
    /// The task stops once every handle has been dropped.
    pub fn spawn(name: &'static str, state: S) -> Self {
        let (jobs, mut queue) = mpsc::unbounded_channel::<LaneJob<S>>();
        tokio::spawn(async move {
            let mut state = state;
            while let Some(job) = queue.recv().await {
                job(&mut state).await;
            }
            debug!("Lane '{}' stopped", name);
        });
        Self { jobs }
    }

    /// Runs `f` on the lane and waits for its result.
    ///
    /// Jobs run strictly in the order they were submitted; a job runs to
    /// completion before the next one starts.
    pub async fn run<R, F>(&self, f: F) -> Result<R, EndpointError>
    where
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, R> + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let lane_job = job(move |state: &mut S| {
            Box::pin(async move {
                let result = f(state).await;
                // The caller may have given up waiting; the job still counts as done.
                let _ = reply_tx.send(result);
            })
        });
        self.jobs
            .send(lane_job)
            .map_err(|_| EndpointError::LaneClosed)?;
        reply_rx.await.map_err(|_| EndpointError::LaneClosed)
    }
}
