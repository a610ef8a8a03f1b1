use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use tokio::sync::oneshot;

use crate::error::RenderError;
use crate::render::{Bitmap, PageRasterizer, DEFAULT_SCALE};

/// Renders allowed to run at once by default.
pub const DEFAULT_CONCURRENCY: usize = 6;

type Outcome = Result<Bitmap, RenderError>;

struct Task {
    id: String,
    source: Arc<dyn PageRasterizer>,
    page: u32,
    priority: i32,
    seq: u64,
    waiters: Vec<oneshot::Sender<Outcome>>,
}

#[derive(Default)]
struct State {
    /// Ordered by `(priority, seq)`; lower priority values run first.
    queue: Vec<Task>,
    active: HashMap<String, Vec<oneshot::Sender<Outcome>>>,
    cache: HashMap<String, Bitmap>,
    next_seq: u64,
    /// Bumped by `clear`; renders dispatched before that are not cached.
    generation: u64,
}

struct Inner {
    state: Mutex<State>,
    concurrency: usize,
    scale: f32,
}

/// A bounded pool of page renders with priority ordering, coalescing by id and a
/// cache of successful results.
///
/// Cloning is cheap; every clone drives the same queue.
#[derive(Clone)]
pub struct RenderScheduler {
    inner: Arc<Inner>,
}

/// Handle to one caller's share of a render.
pub enum RenderTicket {
    Ready(Bitmap),
    Pending(oneshot::Receiver<Outcome>),
}

impl RenderTicket {
    pub async fn wait(self) -> Outcome {
        match self {
            RenderTicket::Ready(bitmap) => Ok(bitmap),
            // a dropped sender means the request was cleared from the queue
            RenderTicket::Pending(rx) => rx.await.unwrap_or(Err(RenderError::Cancelled)),
        }
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl RenderScheduler {
    pub fn new(concurrency: usize) -> Self {
        Self::with_scale(concurrency, DEFAULT_SCALE)
    }

    pub fn with_scale(concurrency: usize, scale: f32) -> Self {
        RenderScheduler {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                concurrency: concurrency.max(1),
                scale,
            }),
        }
    }

    /// Queue a render of `page` under `id`, or join the one already pending for it.
    ///
    /// A cached id resolves immediately. Joining a queued request keeps the more
    /// urgent of the two priorities. Must be called from within a Tokio runtime.
    pub fn request(
        &self,
        id: &str,
        source: Arc<dyn PageRasterizer>,
        page: u32,
        priority: i32,
    ) -> RenderTicket {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = lock(&self.inner.state);
            if let Some(bitmap) = state.cache.get(id) {
                return RenderTicket::Ready(bitmap.clone());
            }
            if let Some(waiters) = state.active.get_mut(id) {
                waiters.push(tx);
                return RenderTicket::Pending(rx);
            }

            if let Some(task) = state.queue.iter_mut().find(|t| t.id == id) {
                task.waiters.push(tx);
                if priority < task.priority {
                    task.priority = priority;
                    state.queue.sort_by_key(|t| (t.priority, t.seq));
                }
            } else {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.queue.push(Task {
                    id: id.to_string(),
                    source,
                    page,
                    priority,
                    seq,
                    waiters: vec![tx],
                });
                state.queue.sort_by_key(|t| (t.priority, t.seq));
            }
        }
        pump(&self.inner);
        RenderTicket::Pending(rx)
    }

    pub async fn submit(
        &self,
        id: &str,
        source: Arc<dyn PageRasterizer>,
        page: u32,
        priority: i32,
    ) -> Outcome {
        self.request(id, source, page, priority).wait().await
    }

    /// Drop every queued request and the cache. Renders already running finish for
    /// their callers but are not cached.
    pub fn clear(&self) {
        let mut state = lock(&self.inner.state);
        let dropped = state.queue.len();
        state.queue.clear();
        state.cache.clear();
        state.generation += 1;
        debug!("Cleared render queue ({} pending)", dropped);
    }

    pub fn cached(&self, id: &str) -> Option<Bitmap> {
        lock(&self.inner.state).cache.get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.inner.state).active.len()
    }

    pub fn queued_count(&self) -> usize {
        lock(&self.inner.state).queue.len()
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    // a panic while holding the lock cannot leave the maps half-updated
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Start queued tasks until every slot is taken.
fn pump(inner: &Arc<Inner>) {
    let mut state = lock(&inner.state);
    while state.active.len() < inner.concurrency && !state.queue.is_empty() {
        let task = state.queue.remove(0);
        if let Some(bitmap) = state.cache.get(&task.id).cloned() {
            for waiter in task.waiters {
                let _ = waiter.send(Ok(bitmap.clone()));
            }
            continue;
        }

        debug!("Rendering {} (priority {})", task.id, task.priority);
        state.active.insert(task.id.clone(), task.waiters);
        let generation = state.generation;
        let inner = Arc::clone(inner);
        let (id, source, page, scale) = (task.id, task.source, task.page, inner.scale);
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || source.rasterize(page, scale))
                .await
                .unwrap_or_else(|e| {
                    Err(RenderError::Failed {
                        page,
                        reason: e.to_string(),
                    })
                })
                .map(Arc::new);
            finish(&inner, &id, generation, outcome);
        });
    }
}

fn finish(inner: &Arc<Inner>, id: &str, generation: u64, outcome: Outcome) {
    {
        let mut state = lock(&inner.state);
        let waiters = state.active.remove(id).unwrap_or_default();
        match &outcome {
            Ok(bitmap) => {
                debug!("Rendered {}", id);
                if state.generation == generation {
                    state.cache.insert(id.to_string(), bitmap.clone());
                }
            }
            Err(e) => warn!("Render of {} failed: {}", id, e),
        }
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
    pump(inner);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::rasterizer::testing::ScriptedRasterizer;
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;

    fn gated(page: u32) -> (Arc<ScriptedRasterizer>, mpsc::Sender<()>) {
        let (release, gate) = mpsc::channel();
        (Arc::new(ScriptedRasterizer::new().gated(page, gate)), release)
    }

    #[tokio::test]
    async fn test_priority_order_without_preemption() {
        let scheduler = RenderScheduler::new(1);
        let (source, release) = gated(1);

        let first = scheduler.request("p1", source.clone(), 1, 5);
        let low = scheduler.request("p3", source.clone(), 3, 9);
        let urgent = scheduler.request("p2", source.clone(), 2, 1);
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.queued_count(), 2);

        release.send(()).unwrap();
        first.wait().await.unwrap();
        urgent.wait().await.unwrap();
        low.wait().await.unwrap();
        assert_eq!(source.started(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_same_id_coalesces_into_one_render() {
        let scheduler = RenderScheduler::new(1);
        let (source, release) = gated(1);

        let blocker = scheduler.request("blocker", source.clone(), 1, 0);
        let a = scheduler.request("p7", source.clone(), 7, 3);
        let b = scheduler.request("p7", source.clone(), 7, 1);
        assert_eq!(scheduler.queued_count(), 1);

        release.send(()).unwrap();
        blocker.wait().await.unwrap();
        let a = a.wait().await.unwrap();
        let b = b.wait().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        // served from the cache from now on
        let again = scheduler.request("p7", source.clone(), 7, 0);
        assert!(matches!(again, RenderTicket::Ready(_)));
        assert!(Arc::ptr_eq(&again.wait().await.unwrap(), &a));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_joining_active_render() {
        let scheduler = RenderScheduler::new(2);
        let (source, release) = gated(4);

        let a = scheduler.request("p4", source.clone(), 4, 0);
        let b = scheduler.request("p4", source.clone(), 4, 0);
        release.send(()).unwrap();
        assert!(Arc::ptr_eq(&a.wait().await.unwrap(), &b.wait().await.unwrap()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached_and_do_not_block_queue() {
        let scheduler = RenderScheduler::new(1);
        let source = Arc::new(ScriptedRasterizer::new().failing(9));

        let bad = scheduler.request("p9", source.clone(), 9, 0);
        let good = scheduler.request("p2", source.clone(), 2, 1);
        assert!(matches!(
            bad.wait().await,
            Err(RenderError::Failed { page: 9, .. })
        ));
        assert!(good.wait().await.is_ok());
        assert!(scheduler.cached("p9").is_none());

        assert!(scheduler.submit("p9", source.clone(), 9, 0).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_clear_cancels_queued_and_skips_cache() {
        let scheduler = RenderScheduler::new(1);
        let (source, release) = gated(1);

        let running = scheduler.request("p1", source.clone(), 1, 0);
        let queued = scheduler.request("p2", source.clone(), 2, 0);
        scheduler.clear();
        assert!(matches!(queued.wait().await, Err(RenderError::Cancelled)));

        release.send(()).unwrap();
        assert!(running.wait().await.is_ok());
        assert!(scheduler.cached("p1").is_none());
        assert_eq!(source.started(), vec![1]);
    }

    #[tokio::test]
    async fn test_bitmap_uses_scheduler_scale() {
        let scheduler = RenderScheduler::with_scale(2, 3.0);
        let source = Arc::new(ScriptedRasterizer::new());
        let bitmap = scheduler.submit("p1", source, 1, 0).await.unwrap();
        assert_eq!(bitmap.dimensions(), (30, 60));
    }
}
