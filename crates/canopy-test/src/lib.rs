//! # Canopy test support
//!
//! A [`TestSession`] wraps an [`Application`] for the duration of a test:
//! it installs a session plugin that can override entries while graphs
//! open, tracks every graph the application opens, captures a designated
//! test graph, injects members into test harness structs, and closes
//! graphs automatically when the session stops.
//!
//! ```
//! use canopy::{Application, Component};
//! use canopy_test::{AutoClose, TestSession};
//!
//! # fn main() -> canopy::Result<()> {
//! let mut builder = Component::builder();
//! builder.constant(1u32)?;
//! let app = Application::with_component("demo", builder.build());
//!
//! let session = TestSession::builder(app.clone())
//!     .extend_root(|builder| {
//!         builder.constant_with(
//!             99u32,
//!             canopy::ConstantOptions::new().with_override(true),
//!         )?;
//!         Ok(())
//!     })
//!     .auto_close(AutoClose::AllGraphs)
//!     .start();
//!
//! let graph = app.open()?;
//! assert_eq!(graph.instance::<u32>()?, 99);
//! session.stop();
//! assert!(!graph.is_open());
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use canopy::{
    Application, ComponentBuilder, Error, Graph, Plugin, Qualifier, Result,
};

/// Selects graphs by their position or declaration qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphMatcher {
    /// The graph with no parent.
    Root,
    /// Any graph opened from a declaration with this qualifier.
    Qualifier(Qualifier),
}

impl GraphMatcher {
    fn matches_opening(&self, parent: Option<&Graph>, qualifier: &Qualifier) -> bool {
        match self {
            Self::Root => parent.is_none(),
            Self::Qualifier(expected) => qualifier == expected,
        }
    }

    fn matches_graph(&self, graph: &Graph) -> bool {
        match self {
            Self::Root => graph.parent().is_none(),
            Self::Qualifier(expected) => graph.component().qualifier() == expected,
        }
    }
}

/// What [`TestSession::stop`] closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoClose {
    /// Leave every graph open.
    None,
    /// Close the captured test graph.
    TestGraph,
    /// Close the captured test graph, then each of its ancestors.
    TestGraphAndAncestors,
    /// Close every graph the session observed, children before parents.
    AllGraphs,
}

/// Reflection-free member injection for test harness structs.
pub trait InjectMembers {
    /// Populate members by resolving from `graph`.
    fn inject(&mut self, graph: &Graph) -> Result<()>;
}

type ExtendFn = Arc<dyn Fn(&mut ComponentBuilder) -> Result<()> + Send + Sync>;
type GraphCallback = Arc<dyn Fn(&Graph) + Send + Sync>;

#[derive(Default)]
struct SessionState {
    /// Open graphs in opening order.
    graphs: Vec<Graph>,
    test_graph: Option<Graph>,
}

struct SessionPlugin {
    extensions: Vec<(GraphMatcher, ExtendFn)>,
    test_matcher: GraphMatcher,
    on_initialized: Option<GraphCallback>,
    on_close: Option<GraphCallback>,
    state: Mutex<SessionState>,
}

impl SessionPlugin {
    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Plugin for SessionPlugin {
    fn name(&self) -> &str {
        "test-session"
    }

    fn graph_initializing(
        &self,
        parent: Option<&Graph>,
        builder: &mut ComponentBuilder,
    ) -> Result<()> {
        let qualifier = builder.qualifier().clone();
        for (matcher, extend) in &self.extensions {
            if matcher.matches_opening(parent, &qualifier) {
                extend(builder)?;
            }
        }
        Ok(())
    }

    fn graph_initialized(&self, graph: &Graph) {
        {
            let mut state = self.lock();
            state.graphs.push(graph.clone());
            if state.test_graph.is_none() && self.test_matcher.matches_graph(graph) {
                debug!(qualifier = %graph.component().qualifier(), "captured test graph");
                state.test_graph = Some(graph.clone());
            }
        }
        if let Some(callback) = &self.on_initialized {
            callback(graph);
        }
    }

    fn graph_close(&self, graph: &Graph) {
        {
            let mut state = self.lock();
            state.graphs.retain(|open| !open.ptr_eq(graph));
            if state
                .test_graph
                .as_ref()
                .is_some_and(|test| test.ptr_eq(graph))
            {
                state.test_graph = None;
            }
        }
        if let Some(callback) = &self.on_close {
            callback(graph);
        }
    }
}

/// Configures and starts a [`TestSession`].
pub struct TestSessionBuilder {
    application: Application,
    extensions: Vec<(GraphMatcher, ExtendFn)>,
    test_matcher: GraphMatcher,
    auto_close: AutoClose,
    on_initialized: Option<GraphCallback>,
    on_close: Option<GraphCallback>,
}

impl TestSessionBuilder {
    fn new(application: Application) -> Self {
        Self {
            application,
            extensions: Vec::new(),
            test_matcher: GraphMatcher::Root,
            auto_close: AutoClose::TestGraph,
            on_initialized: None,
            on_close: None,
        }
    }

    /// Extend declarations of graphs matched by `matcher` while they open.
    /// Use the override flag to replace existing entries.
    pub fn extend(
        mut self,
        matcher: GraphMatcher,
        extend: impl Fn(&mut ComponentBuilder) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.extensions.push((matcher, Arc::new(extend)));
        self
    }

    /// Shorthand for [`TestSessionBuilder::extend`] on the root graph.
    pub fn extend_root(
        self,
        extend: impl Fn(&mut ComponentBuilder) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.extend(GraphMatcher::Root, extend)
    }

    /// Which graph the session captures as its test graph. Defaults to the
    /// root graph.
    pub fn test_graph(mut self, matcher: GraphMatcher) -> Self {
        self.test_matcher = matcher;
        self
    }

    /// What `stop` closes. Defaults to [`AutoClose::TestGraph`].
    pub fn auto_close(mut self, mode: AutoClose) -> Self {
        self.auto_close = mode;
        self
    }

    /// Observe every graph the application opens while the session runs.
    pub fn on_graph_initialized(
        mut self,
        callback: impl Fn(&Graph) + Send + Sync + 'static,
    ) -> Self {
        self.on_initialized = Some(Arc::new(callback));
        self
    }

    /// Observe every graph close while the session runs.
    pub fn on_graph_close(mut self, callback: impl Fn(&Graph) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(callback));
        self
    }

    /// Install the session plugin and hand back the running session.
    pub fn start(self) -> TestSession {
        let plugin = Arc::new(SessionPlugin {
            extensions: self.extensions,
            test_matcher: self.test_matcher,
            on_initialized: self.on_initialized,
            on_close: self.on_close,
            state: Mutex::new(SessionState::default()),
        });
        self.application.register_plugin(plugin.clone());
        debug!(application = %self.application.name(), "test session started");
        TestSession {
            application: self.application,
            plugin,
            auto_close: self.auto_close,
            stopped: false,
        }
    }
}

/// A running test session; see the crate docs for the lifecycle.
pub struct TestSession {
    application: Application,
    plugin: Arc<SessionPlugin>,
    auto_close: AutoClose,
    stopped: bool,
}

impl TestSession {
    /// Start configuring a session for `application`.
    pub fn builder(application: Application) -> TestSessionBuilder {
        TestSessionBuilder::new(application)
    }

    /// The wrapped application.
    pub fn application(&self) -> &Application {
        &self.application
    }

    /// Every graph opened while the session ran and still open.
    pub fn all_graphs(&self) -> Vec<Graph> {
        self.plugin.lock().graphs.clone()
    }

    /// The captured test graph, if one has opened.
    pub fn test_graph(&self) -> Option<Graph> {
        self.plugin.lock().test_graph.clone()
    }

    /// The captured test graph, or an error when none has opened.
    pub fn require_test_graph(&self) -> Result<Graph> {
        self.test_graph()
            .ok_or_else(|| Error::invalid_state("no test graph has been captured"))
    }

    /// Resolve `target`'s members from the test graph.
    pub fn inject<T: InjectMembers>(&self, target: &mut T) -> Result<()> {
        let graph = self.require_test_graph()?;
        target.inject(&graph)
    }

    /// Uninstall the session plugin and run the configured auto-close.
    pub fn stop(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let plugin: Arc<dyn Plugin> = self.plugin.clone();
        self.application.unregister_plugin(&plugin);

        match self.auto_close {
            AutoClose::None => {}
            AutoClose::TestGraph => {
                if let Some(graph) = self.test_graph() {
                    graph.close_if_open();
                }
            }
            AutoClose::TestGraphAndAncestors => {
                let mut current = self.test_graph();
                while let Some(graph) = current {
                    let parent = graph.parent().cloned();
                    graph.close_if_open();
                    current = parent;
                }
            }
            AutoClose::AllGraphs => {
                let mut graphs = self.all_graphs();
                graphs.reverse();
                for graph in graphs {
                    graph.close_if_open();
                }
            }
        }
        debug!(application = %self.application.name(), "test session stopped");
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
