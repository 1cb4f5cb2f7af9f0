//! Thread-pool fan-out across independent release names (spec §5), grounded
//! in `shipcat_cli::helm::parallel::reconcile`'s worker-pool idiom: one
//! `ThreadPool`, one `mpsc` channel reused across jobs, every job runs to
//! completion regardless of earlier failures, and the first error is
//! returned once the whole batch has drained.

use std::sync::mpsc::channel;
use std::sync::Arc;

use threadpool::ThreadPool;

use chartkit_kube::KubeClient;
use chartkit_release::ReleaseStorage;
use chartkit_render::Renderer;

use super::config::EngineConfig;
use super::engine::Engine;
use super::{Error, Result};

/// Thread-safe handles a pooled worker uses to build its own `Engine`
/// inside its own thread. `Engine` itself only borrows its collaborators,
/// so it cannot cross the `'static` boundary `ThreadPool::execute` requires
/// — each job constructs a short-lived `Engine` from these `Arc`s instead.
#[derive(Clone)]
pub struct EngineHandles {
    pub config: Arc<EngineConfig>,
    pub kube: Arc<dyn KubeClient + Send + Sync>,
    pub storage: Arc<dyn ReleaseStorage + Send + Sync>,
    pub renderer: Arc<dyn Renderer + Send + Sync>,
}

impl EngineHandles {
    pub fn new(
        config: Arc<EngineConfig>,
        kube: Arc<dyn KubeClient + Send + Sync>,
        storage: Arc<dyn ReleaseStorage + Send + Sync>,
        renderer: Arc<dyn Renderer + Send + Sync>,
    ) -> EngineHandles {
        EngineHandles { config, kube, storage, renderer }
    }

    fn engine(&self) -> Engine<'_> {
        Engine::new(&self.config, self.kube.as_ref(), self.storage.as_ref(), self.renderer.as_ref())
    }
}

/// Run `work` once per item in `items`, spread across `n_workers` pooled
/// threads. All jobs run to completion before this returns; the first
/// error (by item order, not completion order) is surfaced if any job
/// failed.
pub fn fan_out<T, F>(handles: EngineHandles, items: Vec<T>, n_workers: usize, work: F) -> Result<()>
where
    T: Send + 'static,
    F: Fn(&Engine<'_>, &T) -> Result<()> + Send + Sync + 'static,
{
    let n_jobs = items.len();
    if n_jobs == 0 {
        return Ok(());
    }
    let pool = ThreadPool::new(n_workers.max(1));
    info!("starting {} parallel release jobs using {} workers", n_jobs, n_workers);

    let work = Arc::new(work);
    let (tx, rx) = channel();
    for item in items {
        let handles = handles.clone();
        let work = Arc::clone(&work);
        let tx = tx.clone();
        pool.execute(move || {
            let engine = handles.engine();
            let res = work(&engine, &item);
            if let Err(ref e) = res {
                warn!("fan-out job failed: {}", e);
            }
            tx.send(res).expect("receiver outlives every pooled worker");
        });
    }
    drop(tx);

    // collect every result before deciding what to return, so a job that
    // would otherwise be silently dropped by an early return still runs.
    let errors: Vec<Error> = rx.iter().take(n_jobs).filter_map(Result::err).collect();
    match errors.into_iter().next() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
