//
// context.rs
//
// `current_context` propagation (spec §4.G, §5). Host code invoked while
// an inbound call is being dispatched observes the context value attached
// to that inbound message, and it must keep being observable from any
// continuation chained off of that dispatch — including ones that run
// after the dispatcher itself has returned (e.g. the continuation that
// settles a host-returned future). `tokio::task_local!` gives exactly
// that: a value scoped to a task and everything `.await`ed within it.
//

use serde_json::Value;

tokio::task_local! {
    static CURRENT_CONTEXT: Option<Value>;
}

/// Runs `fut` with `context` installed as the current context for the
/// duration of `fut` (and anything it awaits).
pub async fn scope<F, T>(context: Option<Value>, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_CONTEXT.scope(context, fut).await
}

/// The context attached to the inbound message currently being
/// dispatched, or `None` outside of any dispatch / if the message
/// carried none.
pub fn current() -> Option<Value> {
    CURRENT_CONTEXT.try_with(|c| c.clone()).unwrap_or(None)
}
