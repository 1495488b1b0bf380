//! Plugin behavior: builder hooks, lifecycle observation, and snapshot
//! isolation.

use std::sync::{Arc, Mutex};

use canopy::{
    Application, Component, ComponentBuilder, DynInstance, Graph, Plugin, Result, Scope,
    ServiceOptions,
};

type Log = Arc<Mutex<Vec<String>>>;

struct Recorder {
    events: Log,
}

impl Recorder {
    fn new() -> (Arc<dyn Plugin>, Log) {
        let events: Log = Arc::new(Mutex::new(Vec::new()));
        let plugin = Arc::new(Recorder {
            events: events.clone(),
        });
        (plugin, events)
    }

    fn log(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn graph_initializing(
        &self,
        parent: Option<&Graph>,
        builder: &mut ComponentBuilder,
    ) -> Result<()> {
        self.log(format!(
            "initializing parent={}",
            parent.map_or("none".into(), |p| p.component().qualifier().to_string())
        ));
        builder.constant_qualified(String::from("injected"), "plugin")?;
        Ok(())
    }

    fn graph_initialized(&self, graph: &Graph) {
        self.log(format!(
            "initialized {}",
            graph.component().qualifier()
        ));
    }

    fn post_construct(
        &self,
        _graph: &Graph,
        scope: Scope,
        _argument: Option<&DynInstance>,
        instance: &DynInstance,
    ) {
        let rendered = instance
            .downcast_ref::<u32>()
            .map_or(String::from("?"), |value| value.to_string());
        self.log(format!("constructed {scope} {rendered}"));
    }

    fn graph_close(&self, graph: &Graph) {
        // The graph must still resolve while close hooks run.
        let value = graph.instance_or_none::<u32>().unwrap();
        self.log(format!("closing value={value:?}"));
    }
}

#[test]
fn graph_initializing_extends_the_declaration() {
    let (plugin, events) = Recorder::new();
    let app = Application::new("test");
    app.register_plugin(plugin);

    let graph = app.open().unwrap();
    assert_eq!(
        graph.instance_qualified::<String>("plugin").unwrap(),
        "injected"
    );
    assert_eq!(
        events.lock().unwrap()[..2],
        ["initializing parent=none", "initialized root"]
    );
}

#[test]
fn plugins_observe_fresh_instances_without_registered_callbacks() {
    let (plugin, events) = Recorder::new();
    let mut builder = Component::builder();
    builder.singleton(|_| Ok(13u32)).unwrap();

    let app = Application::with_component("test", builder.build());
    app.register_plugin(plugin);
    let graph = app.open().unwrap();

    graph.instance::<u32>().unwrap();
    graph.instance::<u32>().unwrap();

    let events = events.lock().unwrap();
    let constructed: Vec<_> = events
        .iter()
        .filter(|event| event.starts_with("constructed"))
        .collect();
    // Memoized second resolution must not notify again.
    assert_eq!(constructed, vec!["constructed singleton 13"]);
}

#[test]
fn graph_close_hooks_run_before_disposal_on_a_live_graph() {
    let (plugin, events) = Recorder::new();
    let mut builder = Component::builder();
    let dispose_events = events.clone();
    builder
        .singleton_with(
            |_| Ok(99u32),
            ServiceOptions::new().on_dispose(move |_, _| {
                dispose_events.lock().unwrap().push(String::from("disposed"));
            }),
        )
        .unwrap();

    let app = Application::with_component("test", builder.build());
    app.register_plugin(plugin);
    let graph = app.open().unwrap();
    graph.instance::<u32>().unwrap();
    graph.close().unwrap();

    let events = events.lock().unwrap();
    let closing = events
        .iter()
        .position(|event| event == "closing value=Some(99)")
        .expect("graph_close hook ran against a resolvable graph");
    let disposed = events
        .iter()
        .position(|event| event == "disposed")
        .expect("dispose callback ran");
    assert!(closing < disposed);
}

#[test]
fn graphs_keep_the_plugin_snapshot_taken_at_open() {
    let mut builder = Component::builder();
    builder.subcomponent("session", |_| Ok(())).unwrap();
    let app = Application::with_component("test", builder.build());

    let graph = app.open().unwrap();
    let (plugin, events) = Recorder::new();
    app.register_plugin(plugin);

    // The already-open root keeps its empty snapshot.
    assert!(graph.instance_or_none_qualified::<String>("plugin").unwrap().is_none());

    // A subgraph opened afterwards sees the new plugin.
    let session = graph.open_subgraph("session").unwrap();
    assert_eq!(
        session.instance_qualified::<String>("plugin").unwrap(),
        "injected"
    );
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|event| event == "initializing parent=root"));
}

#[test]
fn unregistered_plugins_stop_affecting_new_graphs() {
    let (plugin, _events) = Recorder::new();
    let app = Application::new("test");
    assert!(app.register_plugin(plugin.clone()));
    assert!(!app.register_plugin(plugin.clone()));

    let graph = app.open().unwrap();
    assert!(graph
        .instance_qualified::<String>("plugin")
        .is_ok());
    app.close().unwrap();

    assert!(app.unregister_plugin(&plugin));
    let graph = app.open().unwrap();
    assert!(graph
        .instance_or_none_qualified::<String>("plugin")
        .unwrap()
        .is_none());
}
