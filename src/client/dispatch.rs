// src/client/dispatch.rs

//! Inbound frame dispatch.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use super::handlers::HandlerTable;
use super::Link;
use crate::{log_debug, log_warn, protocol};

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatched {
    Handled,
    Unhandled,
    Malformed,
    Panicked,
}

/// Decode `frame` and run the handler registered for its method.
///
/// The handler is looked up under the table lock and invoked after the lock
/// is released, so it may register or unregister handlers itself. Decode
/// failures and handler panics are logged and contained.
pub(crate) fn dispatch(handlers: &HandlerTable, link: &Link, frame: &[u8]) -> Dispatched {
    // ---
    let env = match protocol::decode(frame) {
        Ok(env) => env,
        Err(_err) => {
            log_warn!("dropping inbound frame: {_err}");
            return Dispatched::Malformed;
        }
    };

    let Some(handler) = handlers.get(&env.method) else {
        log_debug!("no handler for method {:?}, discarding", env.method);
        return Dispatched::Unhandled;
    };

    log_debug!("dispatching {:?}", env.method);

    match panic::catch_unwind(AssertUnwindSafe(|| handler.call(link, &env))) {
        Ok(()) => Dispatched::Handled,
        Err(_payload) => {
            log_warn!(
                "handler for {:?} panicked: {}",
                env.method,
                panic_message(&*_payload)
            );
            Dispatched::Panicked
        }
    }
}

#[cfg_attr(not(feature = "logging"), allow(dead_code))]
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    // ---
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::client::handlers::Handler;
    use crate::client::test_support::detached_link;
    use crate::Envelope;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn frame(method: &str) -> Vec<u8> {
        protocol::encode(&Envelope::new(method, json!({"n": 1})))
            .unwrap()
            .to_vec()
    }

    #[test]
    fn test_known_method_invokes_handler() {
        // ---
        let table = HandlerTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        table.insert(
            "tick",
            Handler::new(move |_, env| {
                assert_eq!(env.args["n"], 1);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let link = detached_link();
        assert_eq!(dispatch(&table, &link, &frame("tick")), Dispatched::Handled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_method_is_discarded() {
        // ---
        let table = HandlerTable::new();
        let link = detached_link();
        assert_eq!(dispatch(&table, &link, &frame("nope")), Dispatched::Unhandled);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        // ---
        let table = HandlerTable::new();
        let link = detached_link();
        assert_eq!(dispatch(&table, &link, b"not json"), Dispatched::Malformed);
        assert_eq!(
            dispatch(&table, &link, br#"{"args":{}}"#),
            Dispatched::Malformed
        );
    }

    #[test]
    fn test_handler_panic_is_contained() {
        // ---
        let table = HandlerTable::new();
        table.insert("boom", Handler::new(|_, _| panic!("handler failure")));

        let link = detached_link();
        assert_eq!(dispatch(&table, &link, &frame("boom")), Dispatched::Panicked);

        // table still usable afterwards
        table.insert("ok", Handler::new(|_, _| {}));
        assert_eq!(dispatch(&table, &link, &frame("ok")), Dispatched::Handled);
    }

    #[test]
    fn test_handler_may_unregister_itself() {
        // ---
        let table = Arc::new(HandlerTable::new());
        let weak = Arc::downgrade(&table);
        table.insert(
            "once",
            Handler::new(move |_, env| {
                if let Some(table) = weak.upgrade() {
                    table.remove(&env.method, None);
                }
            }),
        );

        let link = detached_link();
        assert_eq!(dispatch(&table, &link, &frame("once")), Dispatched::Handled);
        assert_eq!(dispatch(&table, &link, &frame("once")), Dispatched::Unhandled);
    }
}
