//! Subgraph behavior: delegation, shadowing, identifiers, and teardown
//! ordering.

use std::sync::{Arc, Mutex};

use canopy::{Application, Component, Error, Graph, Qualifier, ServiceOptions};

fn open(component: Component) -> Graph {
    Application::with_component("test", component)
        .open()
        .unwrap()
}

type Log = Arc<Mutex<Vec<String>>>;

fn log(events: &Log, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

#[test]
fn subgraphs_resolve_parent_entries() {
    let mut builder = Component::builder();
    builder.constant(21u32).unwrap();
    builder
        .subcomponent("session", |session| {
            session.singleton(|graph| Ok(i64::from(graph.instance::<u32>()? * 2)))?;
            Ok(())
        })
        .unwrap();

    let root = open(builder.build());
    let session = root.open_subgraph("session").unwrap();

    assert_eq!(session.instance::<i64>().unwrap(), 42);
    assert!(session.parent().unwrap().ptr_eq(&root));
}

#[test]
fn child_entries_shadow_parent_entries() {
    let mut builder = Component::builder();
    builder.constant(String::from("root")).unwrap();
    builder
        .subcomponent("session", |session| {
            session.constant(String::from("session"))?;
            Ok(())
        })
        .unwrap();

    let root = open(builder.build());
    let session = root.open_subgraph("session").unwrap();

    assert_eq!(root.instance::<String>().unwrap(), "root");
    assert_eq!(session.instance::<String>().unwrap(), "session");
}

#[test]
fn parent_singletons_stay_shared_across_subgraphs() {
    let mut builder = Component::builder();
    builder
        .singleton(|_| Ok(Arc::new(Mutex::new(0u32))))
        .unwrap();
    builder.subcomponent("session", |_| Ok(())).unwrap();

    let root = open(builder.build());
    let first = root.open_subgraph_as("session", "one").unwrap();
    let second = root.open_subgraph_as("session", "two").unwrap();

    let from_first = first.instance::<Arc<Mutex<u32>>>().unwrap();
    let from_second = second.instance::<Arc<Mutex<u32>>>().unwrap();
    let from_root = root.instance::<Arc<Mutex<u32>>>().unwrap();
    assert!(Arc::ptr_eq(&from_first, &from_second));
    assert!(Arc::ptr_eq(&from_first, &from_root));
}

#[test]
fn subgraph_entries_can_decorate_the_parent_registration() {
    let mut builder = Component::builder();
    builder.singleton(|_| Ok(String::from("base"))).unwrap();
    builder
        .subcomponent("session", |session| {
            // Same key as the parent's registration; resolving the parent's
            // explicitly is not a cycle.
            session.singleton(|graph| {
                let base = graph.parent().unwrap().instance::<String>()?;
                Ok(format!("{base}-decorated"))
            })?;
            Ok(())
        })
        .unwrap();

    let root = open(builder.build());
    let session = root.open_subgraph("session").unwrap();

    assert_eq!(session.instance::<String>().unwrap(), "base-decorated");
    assert_eq!(root.instance::<String>().unwrap(), "base");
}

#[test]
fn duplicate_identifiers_are_rejected_while_open() {
    let mut builder = Component::builder();
    builder.subcomponent("session", |_| Ok(())).unwrap();
    let root = open(builder.build());

    let first = root.open_subgraph("session").unwrap();
    let error = root.open_subgraph("session").unwrap_err();
    assert!(matches!(error, Error::SubgraphAlreadyOpen { .. }));

    // Distinct identifiers can share the declaration.
    let second = root.open_subgraph_as("session", "other").unwrap();
    assert!(!first.ptr_eq(&second));

    // Closing frees the identifier for reuse.
    first.close().unwrap();
    root.open_subgraph("session").unwrap();
}

#[test]
fn get_or_open_returns_the_live_child() {
    let mut builder = Component::builder();
    builder.subcomponent("session", |_| Ok(())).unwrap();
    let root = open(builder.build());

    let first = root.get_or_open_subgraph("session").unwrap();
    let second = root.get_or_open_subgraph("session").unwrap();
    assert!(first.ptr_eq(&second));
    assert!(root
        .subgraph(&Qualifier::from("session"))
        .unwrap()
        .ptr_eq(&first));
}

#[test]
fn unknown_subcomponents_are_reported() {
    let root = open(Component::builder().build());
    let error = root.open_subgraph("nope").unwrap_err();
    assert!(matches!(error, Error::SubcomponentNotFound { .. }));
}

#[test]
fn subcomponents_declared_on_ancestors_are_reachable() {
    let mut builder = Component::builder();
    builder
        .subcomponent("session", |session| {
            session.subcomponent("request", |request| {
                request.constant(1u32)?;
                Ok(())
            })?;
            Ok(())
        })
        .unwrap();
    builder
        .subcomponent("audit", |audit| {
            audit.constant(2i64)?;
            Ok(())
        })
        .unwrap();

    let root = open(builder.build());
    let session = root.open_subgraph("session").unwrap();
    // "audit" is declared on the root, opened from the session graph.
    let audit = session.open_subgraph("audit").unwrap();
    assert_eq!(audit.instance::<i64>().unwrap(), 2);
    assert!(audit.parent().unwrap().ptr_eq(&session));
}

#[test]
fn closing_a_parent_closes_children_first() {
    let events: Log = Arc::new(Mutex::new(Vec::new()));

    let mut builder = Component::builder();
    let parent_events = events.clone();
    builder
        .singleton_with(
            |_| Ok(1u32),
            ServiceOptions::new().on_dispose(move |_, _| log(&parent_events, "parent")),
        )
        .unwrap();
    let child_events = events.clone();
    builder
        .subcomponent("session", move |session| {
            let child_events = child_events.clone();
            session.singleton_with(
                |_| Ok(1i64),
                ServiceOptions::new().on_dispose(move |graph, _| {
                    let identifier = graph
                        .identifier()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    log(&child_events, format!("child-{identifier}"));
                }),
            )?;
            Ok(())
        })
        .unwrap();

    let root = open(builder.build());
    let first = root.open_subgraph_as("session", "one").unwrap();
    let second = root.open_subgraph_as("session", "two").unwrap();
    root.instance::<u32>().unwrap();
    first.instance::<i64>().unwrap();
    second.instance::<i64>().unwrap();

    root.close().unwrap();
    assert!(!first.is_open());
    assert!(!second.is_open());
    // Both children dispose before the parent, in opening order.
    assert_eq!(
        *events.lock().unwrap(),
        vec!["child-one", "child-two", "parent"]
    );
}

#[test]
fn close_subgraph_detaches_the_child() {
    let mut builder = Component::builder();
    builder.subcomponent("session", |_| Ok(())).unwrap();
    let root = open(builder.build());
    let identifier = Qualifier::from("session");

    let session = root.open_subgraph("session").unwrap();
    assert!(root.close_subgraph(&identifier));
    assert!(!session.is_open());
    assert!(root.subgraph(&identifier).is_none());
    assert!(!root.close_subgraph(&identifier));
}

#[test]
fn directly_closed_children_detach_from_the_parent() {
    let mut builder = Component::builder();
    builder.subcomponent("session", |_| Ok(())).unwrap();
    let root = open(builder.build());
    let identifier = Qualifier::from("session");

    let session = root.open_subgraph("session").unwrap();
    assert_eq!(session.identifier(), Some(&identifier));
    session.close().unwrap();
    assert!(root.subgraph(&identifier).is_none());
    assert!(root.is_open());
}

#[test]
fn open_subgraph_with_extends_the_declaration_for_one_child() {
    let mut builder = Component::builder();
    builder.subcomponent("session", |_| Ok(())).unwrap();
    let root = open(builder.build());

    let extended = root
        .open_subgraph_with(
            Qualifier::from("session"),
            Some(Qualifier::from("extended")),
            Some(Box::new(|builder: &mut canopy::ComponentBuilder| {
                builder.constant(String::from("extra"))?;
                Ok(())
            })),
        )
        .unwrap();
    let plain = root.open_subgraph("session").unwrap();

    assert_eq!(extended.instance::<String>().unwrap(), "extra");
    assert!(plain.instance_or_none::<String>().unwrap().is_none());
}

#[test]
fn instances_of_type_dedupes_shadowed_keys() {
    let mut builder = Component::builder();
    builder.constant(String::from("root")).unwrap();
    builder
        .constant_qualified(String::from("root-other"), "other")
        .unwrap();
    builder
        .subcomponent("session", |session| {
            session.constant(String::from("session"))?;
            Ok(())
        })
        .unwrap();

    let root = open(builder.build());
    let session = root.open_subgraph("session").unwrap();

    let mut instances = session.instances_of_type::<String>().unwrap();
    instances.sort();
    // The unqualified key resolves from the session declaration; the
    // qualified one still comes from the root.
    assert_eq!(instances, vec!["root-other", "session"]);
}
