//! # Canopy cancellation plugin
//!
//! Ties graph lifetime to cancellation: the [`CancellationPlugin`] gives
//! every graph a [`CancellationToken`] constant (a child of the parent
//! graph's token, so cancelling a parent reaches the whole subtree) and a
//! [`DisposeBag`] that collects [`Disposable`] objects. When a graph
//! closes, its token is cancelled and its bag drained.
//!
//! ```
//! use canopy::Application;
//! use canopy_cancel as cancel;
//! use tokio_util::sync::CancellationToken;
//!
//! # fn main() -> canopy::Result<()> {
//! let app = Application::new("demo");
//! cancel::install(&app);
//!
//! let graph = app.open()?;
//! let token = graph.instance::<CancellationToken>()?;
//! assert!(!token.is_cancelled());
//!
//! graph.close()?;
//! assert!(token.is_cancelled());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use canopy::{
    Application, ComponentBuilder, ConstantOptions, Error, Graph, Plugin, Result,
};

/// Something that releases resources exactly once.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

/// Per-graph collection of [`Disposable`] objects, drained on graph close.
pub struct DisposeBag {
    items: Mutex<Vec<Arc<dyn Disposable>>>,
    drained: AtomicBool,
}

impl DisposeBag {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            drained: AtomicBool::new(false),
        }
    }

    /// Add a disposable. After the bag has drained, the disposable is
    /// disposed immediately instead of being held.
    pub fn add(&self, disposable: Arc<dyn Disposable>) {
        if self.drained.load(Ordering::SeqCst) {
            disposable.dispose();
            return;
        }
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(disposable);
    }

    /// Number of disposables currently held.
    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose and release everything held. Later calls are no-ops for
    /// already-drained items.
    pub fn drain(&self) {
        self.drained.store(true, Ordering::SeqCst);
        let items = std::mem::take(
            &mut *self
                .items
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for item in items {
            item.dispose();
        }
    }
}

impl Default for DisposeBag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DisposeBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposeBag")
            .field("len", &self.len())
            .field("drained", &self.drained.load(Ordering::SeqCst))
            .finish()
    }
}

/// Plugin wiring tokens and dispose bags into every opened graph.
pub struct CancellationPlugin;

impl CancellationPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CancellationPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn add_constant<R: Clone + Send + Sync + 'static>(
    builder: &mut ComponentBuilder,
    value: R,
) -> Result<()> {
    // A declaration may register its own token or bag; leave it in place.
    match builder.constant_with(value, ConstantOptions::new()) {
        Ok(_) | Err(Error::DuplicateEntry { .. }) => Ok(()),
        Err(error) => Err(error),
    }
}

impl Plugin for CancellationPlugin {
    fn name(&self) -> &str {
        "cancellation"
    }

    fn graph_initializing(
        &self,
        parent: Option<&Graph>,
        builder: &mut ComponentBuilder,
    ) -> Result<()> {
        let token = match parent {
            Some(parent) => match parent.instance_or_none::<CancellationToken>()? {
                Some(parent_token) => parent_token.child_token(),
                None => CancellationToken::new(),
            },
            None => CancellationToken::new(),
        };
        add_constant(builder, token)?;
        add_constant(builder, Arc::new(DisposeBag::new()))?;
        Ok(())
    }

    fn graph_close(&self, graph: &Graph) {
        match graph.instance_or_none::<CancellationToken>() {
            Ok(Some(token)) => {
                debug!(qualifier = %graph.component().qualifier(), "cancelling graph token");
                token.cancel();
            }
            Ok(None) => {}
            Err(error) => warn!(%error, "failed to resolve cancellation token on close"),
        }
        match graph.instance_or_none::<Arc<DisposeBag>>() {
            Ok(Some(bag)) => bag.drain(),
            Ok(None) => {}
            Err(error) => warn!(%error, "failed to resolve dispose bag on close"),
        }
    }
}

/// Register the cancellation plugin; the returned handle feeds
/// [`uninstall`].
pub fn install(application: &Application) -> Arc<dyn Plugin> {
    let plugin: Arc<dyn Plugin> = Arc::new(CancellationPlugin::new());
    application.register_plugin(plugin.clone());
    plugin
}

/// Remove a previously installed cancellation plugin.
pub fn uninstall(application: &Application, plugin: &Arc<dyn Plugin>) -> bool {
    application.unregister_plugin(plugin)
}
