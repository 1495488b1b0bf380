//! Lifecycle behavior: post-construct batching, disposal, eager singletons,
//! and close semantics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use canopy::{
    Application, Component, Error, FactoryOptions, Graph, Result, ServiceOptions,
};

fn open(component: Component) -> Graph {
    Application::with_component("test", component)
        .open()
        .unwrap()
}

type Log = Arc<Mutex<Vec<String>>>;

fn log(events: &Log, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

#[derive(Clone)]
struct Repo(&'static str);

#[derive(Clone)]
struct Service {
    repo: Repo,
}

#[derive(Clone)]
struct Api {
    service: Service,
}

#[test]
fn post_construct_fires_dependencies_first() {
    crate::init_tracing();
    let events: Log = Arc::new(Mutex::new(Vec::new()));
    let mut builder = Component::builder();

    let repo_events = events.clone();
    builder
        .singleton_with(
            |_| Ok(Repo("db")),
            ServiceOptions::new()
                .on_post_construct(move |_, _| log(&repo_events, "repo")),
        )
        .unwrap();

    let service_events = events.clone();
    builder
        .singleton_with(
            |graph| {
                Ok(Service {
                    repo: graph.instance::<Repo>()?,
                })
            },
            ServiceOptions::new()
                .on_post_construct(move |_, _| log(&service_events, "service")),
        )
        .unwrap();

    let api_events = events.clone();
    builder
        .singleton_with(
            |graph| {
                Ok(Api {
                    service: graph.instance::<Service>()?,
                })
            },
            ServiceOptions::new()
                .on_post_construct(move |_, _| log(&api_events, "api")),
        )
        .unwrap();

    let graph = open(builder.build());
    graph.instance::<Api>().unwrap();

    assert_eq!(*events.lock().unwrap(), vec!["repo", "service", "api"]);
}

#[test]
fn post_construct_fires_once_for_memoized_instances() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();

    let mut builder = Component::builder();
    builder
        .singleton_with(
            |_| Ok(1u32),
            ServiceOptions::new()
                .on_post_construct(move |_, _| log(&recorder, "constructed")),
        )
        .unwrap();
    let graph = open(builder.build());

    graph.instance::<u32>().unwrap();
    graph.instance::<u32>().unwrap();
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[test]
fn dependencies_cached_before_a_failure_still_get_post_construct() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();

    let mut builder = Component::builder();
    builder
        .singleton_with(
            |_| Ok(Repo("db")),
            ServiceOptions::new().on_post_construct(move |_, _| log(&recorder, "repo")),
        )
        .unwrap();
    builder
        .singleton(|graph| -> Result<String> {
            graph.instance::<Repo>()?;
            Err("wiring failed".into())
        })
        .unwrap();
    let graph = open(builder.build());

    let error = graph.instance::<String>().unwrap_err();
    assert!(matches!(error, Error::Resolution { .. }));

    // The dependency stayed memoized, so its notification must have fired
    // when the failed request unwound, and must not fire again.
    assert_eq!(*events.lock().unwrap(), vec!["repo"]);
    graph.instance::<Repo>().unwrap();
    assert_eq!(*events.lock().unwrap(), vec!["repo"]);
}

#[test]
fn post_construct_sees_a_fully_resolvable_graph() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();

    let mut builder = Component::builder();
    builder.constant(String::from("config")).unwrap();
    builder
        .singleton_with(
            |_| Ok(7u32),
            ServiceOptions::new().on_post_construct(move |graph, value| {
                let config = graph.instance::<String>().unwrap();
                log(&recorder, format!("{config}:{value}"));
            }),
        )
        .unwrap();
    let graph = open(builder.build());

    graph.instance::<u32>().unwrap();
    assert_eq!(*events.lock().unwrap(), vec!["config:7"]);
}

#[test]
fn factory_post_construct_receives_the_argument() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();

    let mut builder = Component::builder();
    builder
        .factory_with(
            |_, n: u32| Ok(n.to_string()),
            FactoryOptions::new().on_post_construct(move |_, argument, instance| {
                log(&recorder, format!("{argument} -> {instance}"));
            }),
        )
        .unwrap();
    let graph = open(builder.build());

    graph.factory_instance::<u32, String>(3).unwrap();
    assert_eq!(*events.lock().unwrap(), vec!["3 -> 3"]);
}

#[test]
fn eager_singletons_exist_after_open() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut builder = Component::builder();
    builder
        .eager_singleton(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(11u32)
        })
        .unwrap();
    let graph = open(builder.build());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    graph.instance::<u32>().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_eager_initialization_fails_open_and_disposes_prior_services() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();

    let mut builder = Component::builder();
    builder
        .eager_singleton_with(
            |_| Ok(1u32),
            ServiceOptions::new().on_dispose(move |_, _| log(&recorder, "disposed")),
        )
        .unwrap();
    builder
        .eager_singleton(|_| -> Result<i64> { Err("init failed".into()) })
        .unwrap();

    let error = Application::with_component("test", builder.build())
        .open()
        .unwrap_err();
    assert!(matches!(error, Error::Resolution { .. }));
    assert_eq!(*events.lock().unwrap(), vec!["disposed"]);
}

#[test]
fn dispose_runs_for_created_singletons_only() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));

    let mut builder = Component::builder();
    let created = events.clone();
    builder
        .singleton_with(
            |_| Ok(1u32),
            ServiceOptions::new().on_dispose(move |_, _| log(&created, "u32")),
        )
        .unwrap();
    let untouched = events.clone();
    builder
        .singleton_with(
            |_| Ok(1i64),
            ServiceOptions::new().on_dispose(move |_, _| log(&untouched, "i64")),
        )
        .unwrap();

    let graph = open(builder.build());
    graph.instance::<u32>().unwrap();
    graph.close().unwrap();

    assert_eq!(*events.lock().unwrap(), vec!["u32"]);
}

#[test]
fn multiton_dispose_covers_every_cached_argument() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();

    let mut builder = Component::builder();
    builder
        .multiton_with(
            |_, n: u32| Ok(n * 10),
            FactoryOptions::new().on_dispose(move |_, argument, instance| {
                log(&recorder, format!("{argument}:{instance}"));
            }),
        )
        .unwrap();

    let graph = open(builder.build());
    graph.factory_instance::<u32, u32>(1).unwrap();
    graph.factory_instance::<u32, u32>(2).unwrap();
    graph.close().unwrap();

    let mut disposed = events.lock().unwrap().clone();
    disposed.sort();
    assert_eq!(disposed, vec!["1:10", "2:20"]);
}

#[test]
fn close_is_idempotent_and_terminal() {
    let graph = open(Component::builder().build());

    assert!(graph.is_open());
    graph.close().unwrap();
    assert!(!graph.is_open());

    assert!(matches!(graph.close(), Err(Error::GraphClosed)));
    assert!(!graph.close_if_open());
}

#[test]
fn resolution_after_close_is_rejected() {
    let mut builder = Component::builder();
    builder.constant(1u32).unwrap();
    let graph = open(builder.build());
    graph.close().unwrap();

    assert!(matches!(
        graph.instance::<u32>(),
        Err(Error::GraphClosed)
    ));
}

#[test]
fn application_tracks_its_root_graph() {
    let mut builder = Component::builder();
    builder.constant(1u32).unwrap();
    let app = Application::with_component("test", builder.build());

    assert!(app.graph().is_none());
    let graph = app.open().unwrap();
    assert!(app.graph().unwrap().ptr_eq(&graph));

    // A second open fails while the root is live.
    assert!(matches!(app.open(), Err(Error::InvalidState { .. })));
    assert!(app.get_or_open().unwrap().ptr_eq(&graph));

    app.close().unwrap();
    assert!(app.graph().is_none());
    assert!(matches!(app.close(), Err(Error::GraphClosed)));

    // Closing the graph directly also clears the slot.
    let reopened = app.open().unwrap();
    reopened.close().unwrap();
    assert!(app.graph().is_none());
    app.open().unwrap();
}

#[test]
fn replacing_the_root_component_requires_a_closed_root() {
    let app = Application::new("test");
    let mut builder = Component::builder();
    builder.constant(5u32).unwrap();
    app.register_component(builder.build()).unwrap();

    let graph = app.open().unwrap();
    assert_eq!(graph.instance::<u32>().unwrap(), 5);
    assert!(app.register_component(Component::builder().build()).is_err());

    app.close().unwrap();
    app.register_component(Component::builder().build()).unwrap();
    let graph = app.open().unwrap();
    assert!(graph.instance_or_none::<u32>().unwrap().is_none());
}
