//! Turning auditing on and off, globally or per entity type.
//!
//! Two layers decide whether an entity type is audited:
//!
//! - Scoped overrides from [`AuditingSwitch::without_auditing`] and
//!   [`AuditingSwitch::with_auditing`] (and their `_sync` forms). They live in
//!   a tokio task-local, so a scope opened in one task never silences audits
//!   written by another task running at the same time.
//! - The shared baseline: the global flag from [`crate::config::AuditConfig`]
//!   plus process-wide toggles taken with [`AuditingSwitch::disable`] and
//!   friends. Each toggle hands back a [`SwitchGuard`]; dropping it removes
//!   that toggle only, so guards released out of order leave the others in
//!   force.

use std::{
  collections::HashMap,
  future::Future,
  sync::{Arc, Mutex, MutexGuard},
};

tokio::task_local! {
  static SCOPED: ScopedOverrides;
}

/// Per-type settings of the enclosing `with_auditing`/`without_auditing`
/// scopes in the current task.
#[derive(Debug, Clone, Default)]
struct ScopedOverrides {
  entities: HashMap<String, bool>,
}

impl ScopedOverrides {
  fn current() -> Self { SCOPED.try_with(Clone::clone).unwrap_or_default() }

  fn get(entity_type: &str) -> Option<bool> {
    SCOPED.try_with(|o| o.entities.get(entity_type).copied()).ok().flatten()
  }

  /// The current overrides with `entity_type` set to `enabled`.
  fn with(entity_type: &str, enabled: bool) -> Self {
    let mut next = Self::current();
    next.entities.insert(entity_type.to_owned(), enabled);
    next
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
  Global,
  Entity(String),
}

#[derive(Debug)]
struct Toggle {
  id:    u64,
  slot:  Slot,
  value: bool,
}

#[derive(Debug)]
struct SwitchState {
  global:  bool,
  /// Live toggles, oldest first. The newest one for a slot wins.
  toggles: Vec<Toggle>,
  next_id: u64,
}

impl SwitchState {
  fn toggled(&self, slot: &Slot) -> Option<bool> {
    self.toggles.iter().rev().find(|t| t.slot == *slot).map(|t| t.value)
  }
}

/// Shared enable/disable state. Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct AuditingSwitch {
  state: Arc<Mutex<SwitchState>>,
}

impl Default for AuditingSwitch {
  fn default() -> Self { Self::new(true) }
}

impl AuditingSwitch {
  pub fn new(enabled: bool) -> Self {
    Self {
      state: Arc::new(Mutex::new(SwitchState { global: enabled, toggles: vec![], next_id: 0 })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, SwitchState> {
    // Plain flags; a poisoned lock still holds a usable value.
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Whether audits are written for `entity_type` right now, in this task.
  pub fn is_enabled(&self, entity_type: &str) -> bool {
    let state = self.lock();
    let global = state.toggled(&Slot::Global).unwrap_or(state.global);
    let entity = ScopedOverrides::get(entity_type)
      .or_else(|| state.toggled(&Slot::Entity(entity_type.to_owned())))
      .unwrap_or(true);
    global && entity
  }

  pub fn is_globally_enabled(&self) -> bool {
    let state = self.lock();
    state.toggled(&Slot::Global).unwrap_or(state.global)
  }

  fn set(&self, slot: Slot, value: bool) -> SwitchGuard {
    let mut state = self.lock();
    let id = state.next_id;
    state.next_id += 1;
    state.toggles.push(Toggle { id, slot, value });
    SwitchGuard { switch: self.clone(), id }
  }

  /// Process-wide: disable `entity_type` for every task until the guard
  /// drops.
  pub fn disable(&self, entity_type: impl Into<String>) -> SwitchGuard {
    self.set(Slot::Entity(entity_type.into()), false)
  }

  /// Process-wide: enable `entity_type` for every task until the guard
  /// drops.
  pub fn enable(&self, entity_type: impl Into<String>) -> SwitchGuard {
    self.set(Slot::Entity(entity_type.into()), true)
  }

  pub fn disable_all(&self) -> SwitchGuard { self.set(Slot::Global, false) }

  pub fn enable_all(&self) -> SwitchGuard { self.set(Slot::Global, true) }

  /// Run `f` with auditing disabled for `entity_type` in the current task.
  pub fn without_auditing_sync<R>(&self, entity_type: &str, f: impl FnOnce() -> R) -> R {
    SCOPED.sync_scope(ScopedOverrides::with(entity_type, false), f)
  }

  /// Run `f` with auditing enabled for `entity_type` in the current task.
  pub fn with_auditing_sync<R>(&self, entity_type: &str, f: impl FnOnce() -> R) -> R {
    SCOPED.sync_scope(ScopedOverrides::with(entity_type, true), f)
  }

  /// Await `fut` with auditing disabled for `entity_type`. Other tasks are
  /// unaffected.
  pub async fn without_auditing<F: Future>(&self, entity_type: &str, fut: F) -> F::Output {
    SCOPED.scope(ScopedOverrides::with(entity_type, false), fut).await
  }

  /// Await `fut` with auditing enabled for `entity_type`. Other tasks are
  /// unaffected.
  pub async fn with_auditing<F: Future>(&self, entity_type: &str, fut: F) -> F::Output {
    SCOPED.scope(ScopedOverrides::with(entity_type, true), fut).await
  }
}

/// Withdraws one process-wide toggle when dropped.
#[must_use = "dropping the guard immediately withdraws the toggle"]
#[derive(Debug)]
pub struct SwitchGuard {
  switch: AuditingSwitch,
  id:     u64,
}

impl Drop for SwitchGuard {
  fn drop(&mut self) {
    let id = self.id;
    self.switch.lock().toggles.retain(|t| t.id != id);
  }
}
