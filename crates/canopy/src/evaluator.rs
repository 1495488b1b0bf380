//! Service evaluator
//!
//! Drives factory invocation for one resolution call tree. The evaluator
//! keeps a thread-local stack of in-flight (graph, key) frames, which gives
//! same-thread cycle detection, and batches post-construct notifications so
//! they fire only after the outermost resolution has finished, in
//! dependencies-first order.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use tracing::trace;

use crate::bound::BoundService;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::key::TypeKey;
use crate::service::DynInstance;

struct Pending {
    service: Arc<dyn BoundService>,
    graph: Graph,
    argument: Option<DynInstance>,
    instance: DynInstance,
}

#[derive(Default)]
struct EvalState {
    /// Resolutions currently in flight on this thread as (owning graph, key)
    /// pairs, outermost first. The same key may legitimately be in flight in
    /// two graphs at once, as when a subgraph entry resolves its parent's
    /// registration of the same type.
    frames: Vec<(usize, TypeKey)>,
    /// Freshly created instances awaiting post-construct notification.
    pending: VecDeque<Pending>,
}

thread_local! {
    static STATE: RefCell<EvalState> = RefCell::new(EvalState::default());
}

/// Resolve an instance through `service`, tracking the in-flight frame.
///
/// Scope caches are consulted by the service before it calls in here, and
/// again inside `new_instance` under the service's creation lock, so a cached
/// hit never notifies twice.
pub(crate) fn evaluate(
    service: Arc<dyn BoundService>,
    graph: &Graph,
    argument: Option<DynInstance>,
) -> Result<DynInstance> {
    let key = service.key().clone();
    let graph_id = graph.id();

    STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state
            .frames
            .iter()
            .any(|(owner, frame)| *owner == graph_id && frame == &key)
        {
            let chain = format_chain(&state.frames, graph_id, &key);
            return Err(Error::CyclicDependency { key: key.clone(), chain });
        }
        state.frames.push((graph_id, key.clone()));
        Ok(())
    })?;

    trace!(key = %key, "evaluating service");

    // The frame is popped by the guard even when the factory panics, so a
    // later resolution on this thread never sees a stale in-flight key.
    let guard = FrameGuard;

    // The factory runs outside any borrow of the thread-local state; nested
    // resolutions re-enter `evaluate` on this thread.
    match service.new_instance(graph, argument.as_ref()) {
        Ok(evaluated) => {
            let notify = evaluated.fresh && graph.needs_lifecycle();
            drop(guard);
            let depth = STATE.with(|state| {
                let mut state = state.borrow_mut();
                if notify {
                    state.pending.push_back(Pending {
                        service,
                        graph: graph.clone(),
                        argument,
                        instance: evaluated.instance.clone(),
                    });
                }
                state.frames.len()
            });
            if depth == 0 {
                drain_pending();
            }
            Ok(evaluated.instance)
        }
        Err(error) => {
            drop(guard);
            // Dependencies created before the failure stay cached in their
            // graphs, so their notifications still fire when the outermost
            // request unwinds.
            let depth = STATE.with(|state| state.borrow_mut().frames.len());
            if depth == 0 {
                drain_pending();
            }
            Err(attribute(key, error))
        }
    }
}

struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        STATE.with(|state| {
            state.borrow_mut().frames.pop();
        });
    }
}

/// Fire post-construct notifications queued by a completed call tree.
///
/// Notifications drain one at a time because a callback may itself resolve
/// services, which re-enters the evaluator on this thread.
fn drain_pending() {
    loop {
        let next = STATE.with(|state| state.borrow_mut().pending.pop_front());
        let Some(pending) = next else {
            return;
        };
        pending.graph.notify_post_construct(
            pending.service.as_ref(),
            pending.argument.as_ref(),
            &pending.instance,
        );
    }
}

/// Attribute an error raised inside a factory block to the key being
/// resolved.
fn attribute(key: TypeKey, error: Error) -> Error {
    match error {
        Error::EntryNotFound { key: missing } => Error::MissingDependency { key, missing },
        Error::Factory(source) => Error::Resolution { key, source },
        other => other,
    }
}

/// Render the dependency chain from the first occurrence of `key` in its
/// graph to the point where resolving it again closed the cycle.
fn format_chain(frames: &[(usize, TypeKey)], graph_id: usize, key: &TypeKey) -> String {
    let start = frames
        .iter()
        .position(|(owner, frame)| *owner == graph_id && frame == key)
        .unwrap_or(0);
    let mut chain = String::new();
    for (_, frame) in &frames[start..] {
        if !chain.is_empty() {
            chain.push_str(" -> ");
        }
        chain.push_str(&frame.to_string());
    }
    chain.push_str(" => ");
    chain.push_str(&key.to_string());
    chain
}
