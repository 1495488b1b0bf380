//! Session lifecycle: extensions, graph capture, injection, auto-close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use canopy::{Application, Component, ConstantOptions, Error, Graph, Qualifier, Result};
use canopy_test::{AutoClose, GraphMatcher, InjectMembers, TestSession};

fn app_with_session_subcomponent() -> Application {
    let mut builder = Component::builder();
    builder.constant(1u32).unwrap();
    builder
        .subcomponent("session", |session| {
            session.constant(2i64)?;
            Ok(())
        })
        .unwrap();
    Application::with_component("test", builder.build())
}

#[test]
fn extensions_apply_only_to_matching_graphs() {
    let app = app_with_session_subcomponent();
    let session = TestSession::builder(app.clone())
        .extend_root(|builder| {
            builder.constant(String::from("root-extra"))?;
            Ok(())
        })
        .extend(
            GraphMatcher::Qualifier(Qualifier::from("session")),
            |builder| {
                builder.constant_with(
                    20i64,
                    ConstantOptions::new().with_override(true),
                )?;
                Ok(())
            },
        )
        .auto_close(AutoClose::AllGraphs)
        .start();

    let root = app.open().unwrap();
    let child = root.open_subgraph("session").unwrap();

    assert_eq!(root.instance::<String>().unwrap(), "root-extra");
    // The session override replaced the declared constant.
    assert_eq!(child.instance::<i64>().unwrap(), 20);
    assert_eq!(root.instance::<u32>().unwrap(), 1);

    session.stop();
}

#[test]
fn captures_the_graph_selected_by_the_matcher() {
    let app = app_with_session_subcomponent();
    let session = TestSession::builder(app.clone())
        .test_graph(GraphMatcher::Qualifier(Qualifier::from("session")))
        .auto_close(AutoClose::AllGraphs)
        .start();

    assert!(session.test_graph().is_none());
    assert!(matches!(
        session.require_test_graph(),
        Err(Error::InvalidState { .. })
    ));

    let root = app.open().unwrap();
    assert!(session.test_graph().is_none());

    let child = root.open_subgraph("session").unwrap();
    assert!(session.require_test_graph().unwrap().ptr_eq(&child));
    assert_eq!(session.all_graphs().len(), 2);

    session.stop();
}

#[test]
fn closed_graphs_leave_the_session_bookkeeping() {
    let app = app_with_session_subcomponent();
    let session = TestSession::builder(app.clone())
        .auto_close(AutoClose::None)
        .start();

    let root = app.open().unwrap();
    let child = root.open_subgraph("session").unwrap();
    assert_eq!(session.all_graphs().len(), 2);

    child.close().unwrap();
    assert_eq!(session.all_graphs().len(), 1);

    root.close().unwrap();
    assert!(session.all_graphs().is_empty());
    assert!(session.test_graph().is_none());
    session.stop();
}

struct Harness {
    answer: Option<u32>,
}

impl InjectMembers for Harness {
    fn inject(&mut self, graph: &Graph) -> Result<()> {
        self.answer = Some(graph.instance::<u32>()?);
        Ok(())
    }
}

#[test]
fn inject_populates_members_from_the_test_graph() {
    let app = app_with_session_subcomponent();
    let session = TestSession::builder(app.clone())
        .auto_close(AutoClose::AllGraphs)
        .start();
    app.open().unwrap();

    let mut harness = Harness { answer: None };
    session.inject(&mut harness).unwrap();
    assert_eq!(harness.answer, Some(1));

    session.stop();
}

#[test]
fn auto_close_modes() {
    // None leaves everything open.
    let app = app_with_session_subcomponent();
    let session = TestSession::builder(app.clone())
        .auto_close(AutoClose::None)
        .start();
    let root = app.open().unwrap();
    session.stop();
    assert!(root.is_open());
    root.close().unwrap();

    // TestGraph closes only the captured graph.
    let app = app_with_session_subcomponent();
    let session = TestSession::builder(app.clone())
        .test_graph(GraphMatcher::Qualifier(Qualifier::from("session")))
        .auto_close(AutoClose::TestGraph)
        .start();
    let root = app.open().unwrap();
    let child = root.open_subgraph("session").unwrap();
    session.stop();
    assert!(!child.is_open());
    assert!(root.is_open());
    root.close().unwrap();

    // TestGraphAndAncestors walks up to the root.
    let app = app_with_session_subcomponent();
    let session = TestSession::builder(app.clone())
        .test_graph(GraphMatcher::Qualifier(Qualifier::from("session")))
        .auto_close(AutoClose::TestGraphAndAncestors)
        .start();
    let root = app.open().unwrap();
    let child = root.open_subgraph("session").unwrap();
    session.stop();
    assert!(!child.is_open());
    assert!(!root.is_open());

    // AllGraphs closes every observed graph.
    let app = app_with_session_subcomponent();
    let session = TestSession::builder(app.clone())
        .auto_close(AutoClose::AllGraphs)
        .start();
    let root = app.open().unwrap();
    let child = root.open_subgraph("session").unwrap();
    session.stop();
    assert!(!child.is_open());
    assert!(!root.is_open());
}

#[test]
fn stop_uninstalls_the_session_plugin() {
    let app = app_with_session_subcomponent();
    let session = TestSession::builder(app.clone())
        .extend_root(|builder| {
            builder.constant(String::from("extra"))?;
            Ok(())
        })
        .auto_close(AutoClose::AllGraphs)
        .start();

    let graph = app.open().unwrap();
    assert!(graph.instance_or_none::<String>().unwrap().is_some());
    session.stop();

    let graph = app.open().unwrap();
    assert!(graph.instance_or_none::<String>().unwrap().is_none());
    graph.close().unwrap();
}

#[test]
fn dropping_a_session_behaves_like_stop() {
    let app = app_with_session_subcomponent();
    let root = {
        let _session = TestSession::builder(app.clone())
            .auto_close(AutoClose::AllGraphs)
            .start();
        app.open().unwrap()
    };
    assert!(!root.is_open());
}

#[test]
fn lifecycle_callbacks_observe_open_and_close() {
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));

    let app = app_with_session_subcomponent();
    let opened_counter = opened.clone();
    let closed_counter = closed.clone();
    let session = TestSession::builder(app.clone())
        .on_graph_initialized(move |_| {
            opened_counter.fetch_add(1, Ordering::SeqCst);
        })
        .on_graph_close(move |_| {
            closed_counter.fetch_add(1, Ordering::SeqCst);
        })
        .auto_close(AutoClose::AllGraphs)
        .start();

    let root = app.open().unwrap();
    root.open_subgraph("session").unwrap();
    assert_eq!(opened.load(Ordering::SeqCst), 2);

    session.stop();
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}
