//! Ambient actor and request metadata.
//!
//! The values live in a tokio task-local, so every task (one web request, one
//! queued job) sees only the scope it was run in. Scopes nest: an inner scope
//! shadows the outer one and the outer value is back in place once the inner
//! future or closure returns, unwinds, or is dropped.

use std::future::Future;

use crate::record::Actor;

tokio::task_local! {
  static CURRENT: RequestContext;
}

/// Attribution for every audit written inside a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
  pub actor:          Option<Actor>,
  pub remote_address: Option<String>,
  pub request_id:     Option<String>,
}

impl RequestContext {
  pub fn new() -> Self { Self::default() }

  pub fn with_actor(mut self, actor: impl Into<Actor>) -> Self {
    self.actor = Some(actor.into());
    self
  }

  pub fn with_remote_address(mut self, addr: impl Into<String>) -> Self {
    self.remote_address = Some(addr.into());
    self
  }

  pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
    self.request_id = Some(id.into());
    self
  }

  /// Fill unset fields from `outer`.
  fn inherit(self, outer: Option<RequestContext>) -> Self {
    let Some(outer) = outer else {
      return self;
    };
    Self {
      actor:          self.actor.or(outer.actor),
      remote_address: self.remote_address.or(outer.remote_address),
      request_id:     self.request_id.or(outer.request_id),
    }
  }
}

/// The context of the enclosing scope, if any.
pub fn current() -> Option<RequestContext> { CURRENT.try_with(Clone::clone).ok() }

/// The actor of the enclosing scope, if any.
pub fn current_actor() -> Option<Actor> { current().and_then(|ctx| ctx.actor) }

/// Run `fut` with `ctx` as the ambient request context. Fields left unset
/// are inherited from the enclosing scope.
pub async fn with_request<F: Future>(ctx: RequestContext, fut: F) -> F::Output {
  CURRENT.scope(ctx.inherit(current()), fut).await
}

/// Run `fut` with `actor` as the ambient actor.
pub async fn as_actor<F: Future>(actor: impl Into<Actor>, fut: F) -> F::Output {
  with_request(RequestContext::new().with_actor(actor), fut).await
}

/// Synchronous form of [`with_request`].
pub fn with_request_sync<R>(ctx: RequestContext, f: impl FnOnce() -> R) -> R {
  CURRENT.sync_scope(ctx.inherit(current()), f)
}

/// Synchronous form of [`as_actor`].
pub fn as_actor_sync<R>(actor: impl Into<Actor>, f: impl FnOnce() -> R) -> R {
  with_request_sync(RequestContext::new().with_actor(actor), f)
}
