use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use tokio::sync::{oneshot, watch};

use crate::error::RenderError;
use crate::render::{Bitmap, PageRasterizer};

/// What a surface render ended with. Being superseded is not an error.
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    Rendered(Bitmap),
    Cancelled,
}

struct Binding {
    token: u64,
    cancel: watch::Sender<bool>,
    finished: oneshot::Receiver<()>,
}

#[derive(Default)]
struct Bindings {
    next_token: u64,
    by_surface: HashMap<String, Binding>,
}

/// Renders bound to named output surfaces (a preview pane, a thumbnail slot).
///
/// Starting a render on a surface cancels the one already bound to it and waits for
/// it to settle first. Results are never cached; pair with
/// [`RenderScheduler`](super::RenderScheduler) for that.
#[derive(Clone, Default)]
pub struct SurfaceRenderer {
    bindings: Arc<Mutex<Bindings>>,
}

impl SurfaceRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render `page` scaled to `target_width` pixels onto `surface`.
    pub async fn render(
        &self,
        surface: &str,
        source: Arc<dyn PageRasterizer>,
        page: u32,
        target_width: u32,
    ) -> Result<RenderOutcome, RenderError> {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();
        let (token, previous) = {
            let mut bindings = self.lock();
            let token = bindings.next_token;
            bindings.next_token += 1;
            let previous = bindings.by_surface.insert(
                surface.to_string(),
                Binding {
                    token,
                    cancel: cancel_tx,
                    finished: done_rx,
                },
            );
            (token, previous)
        };

        if let Some(previous) = previous {
            debug!("Cancelling previous render on {}", surface);
            let _ = previous.cancel.send(true);
            let _ = previous.finished.await;
        }

        let finished = tokio::select! {
            _ = cancelled(&mut cancel_rx) => None,
            result = rasterize_to_width(source, page, target_width) => Some(result),
        };
        let superseded = *cancel_rx.borrow();
        let outcome = match finished {
            Some(result) if !superseded => {
                result.map(|bitmap| RenderOutcome::Rendered(Arc::new(bitmap)))
            }
            _ => Ok(RenderOutcome::Cancelled),
        };

        self.release(surface, token);
        drop(done_tx);
        outcome
    }

    /// Cancel whatever is bound to `surface` without starting anything new.
    pub async fn cancel(&self, surface: &str) {
        let previous = self.lock().by_surface.remove(surface);
        if let Some(previous) = previous {
            let _ = previous.cancel.send(true);
            let _ = previous.finished.await;
        }
    }

    pub fn is_busy(&self, surface: &str) -> bool {
        self.lock().by_surface.contains_key(surface)
    }

    fn release(&self, surface: &str, token: u64) {
        let mut bindings = self.lock();
        if bindings
            .by_surface
            .get(surface)
            .is_some_and(|binding| binding.token == token)
        {
            bindings.by_surface.remove(surface);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bindings> {
        self.bindings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        // the binding was dropped without cancelling; keep rendering
        std::future::pending::<()>().await;
    }
}

async fn rasterize_to_width(
    source: Arc<dyn PageRasterizer>,
    page: u32,
    target_width: u32,
) -> Result<image::RgbaImage, RenderError> {
    let (width, _) = source.page_size(page).ok_or_else(|| RenderError::Failed {
        page,
        reason: "page out of range".to_string(),
    })?;
    let scale = target_width.max(1) as f32 / width;
    tokio::task::spawn_blocking(move || source.rasterize(page, scale))
        .await
        .unwrap_or_else(|e| {
            Err(RenderError::Failed {
                page,
                reason: e.to_string(),
            })
        })
}
