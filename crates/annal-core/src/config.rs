//! Audit configuration: global defaults plus per-entity-type overrides.
//!
//! Deserialised from the `[audit]` table of `annal.toml` by the CLI; embedders
//! may build it directly.
//!
//! ```toml
//! [audit]
//! max_audits = 50
//!
//! [audit.entities.User]
//! except           = ["password_digest"]
//! redacted         = ["ssn"]
//! comment_required = ["destroy"]
//! ```

use std::collections::{BTreeSet, HashMap};

use serde::Deserialize;
use serde_json::Value;

use crate::record::Action;

fn default_true() -> bool { true }

fn default_ignored_fields() -> Vec<String> {
  ["id", "lock_version", "created_at", "updated_at", "created_on", "updated_on"]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_redaction_value() -> Value { Value::String("[REDACTED]".into()) }

fn all_actions() -> Vec<Action> { Action::ALL.to_vec() }

/// Process-wide audit settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
  /// Initial state of the global auditing switch.
  #[serde(default = "default_true")]
  pub enabled:                      bool,
  /// Fields never audited on any entity (primary key, bookkeeping columns).
  #[serde(default = "default_ignored_fields")]
  pub ignored_fields:               Vec<String>,
  /// Cap on records kept per entity; unset keeps everything.
  #[serde(default)]
  pub max_audits:                   Option<usize>,
  /// Whether an update with no field changes but with a comment is still
  /// recorded.
  #[serde(default = "default_true")]
  pub persist_comment_only_updates: bool,
  /// Stored in place of redacted values.
  #[serde(default = "default_redaction_value")]
  pub redaction_value:              Value,
  /// Per entity type overrides, keyed by type name.
  #[serde(default)]
  pub entities:                     HashMap<String, EntityAuditConfig>,
}

impl Default for AuditConfig {
  fn default() -> Self {
    Self {
      enabled:                      true,
      ignored_fields:               default_ignored_fields(),
      max_audits:                   None,
      persist_comment_only_updates: true,
      redaction_value:              default_redaction_value(),
      entities:                     HashMap::new(),
    }
  }
}

impl AuditConfig {
  /// Settings for `entity_type`, falling back to defaults.
  pub fn entity(&self, entity_type: &str) -> EntityAuditConfig {
    self.lookup(entity_type).cloned().unwrap_or_default()
  }

  /// Type names are matched exactly first, then case-insensitively: the
  /// `config` crate lowercases table keys read from files and environment.
  fn lookup(&self, entity_type: &str) -> Option<&EntityAuditConfig> {
    self.entities.get(entity_type).or_else(|| {
      self
        .entities
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(entity_type))
        .map(|(_, cfg)| cfg)
    })
  }

  /// Register overrides for one entity type.
  pub fn with_entity(mut self, entity_type: impl Into<String>, cfg: EntityAuditConfig) -> Self {
    self.entities.insert(entity_type.into(), cfg);
    self
  }

  /// The retention cap for `entity_type`: its own override, else the global
  /// one.
  pub fn max_audits_for(&self, entity_type: &str) -> Option<usize> {
    self.lookup(entity_type).and_then(|e| e.max_audits).or(self.max_audits)
  }

  /// Whether `field` is audited on `entity_type`, given the entity's own
  /// extra ignored fields.
  pub fn is_audited_field(
    &self,
    entity_type: &str,
    field: &str,
    entity_ignored: &BTreeSet<String>,
  ) -> bool {
    if self.ignored_fields.iter().any(|f| f == field) || entity_ignored.contains(field) {
      return false;
    }
    let Some(cfg) = self.lookup(entity_type) else {
      return true;
    };
    if !cfg.only.is_empty() {
      return cfg.only.iter().any(|f| f == field);
    }
    !cfg.except.iter().any(|f| f == field)
  }
}

/// Overrides for a single entity type.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityAuditConfig {
  /// When non-empty, only these fields are audited.
  #[serde(default)]
  pub only:             Vec<String>,
  /// Fields excluded from auditing. Ignored when `only` is set.
  #[serde(default)]
  pub except:           Vec<String>,
  /// Fields whose values are replaced by the redaction value.
  #[serde(default)]
  pub redacted:         Vec<String>,
  /// Actions that are audited at all.
  #[serde(default = "all_actions")]
  pub on:               Vec<Action>,
  /// Actions that must carry a comment.
  #[serde(default)]
  pub comment_required: Vec<Action>,
  #[serde(default)]
  pub max_audits:       Option<usize>,
}

impl Default for EntityAuditConfig {
  fn default() -> Self {
    Self {
      only:             Vec::new(),
      except:           Vec::new(),
      redacted:         Vec::new(),
      on:               all_actions(),
      comment_required: Vec::new(),
      max_audits:       None,
    }
  }
}

impl EntityAuditConfig {
  pub fn audits(&self, action: Action) -> bool { self.on.contains(&action) }

  pub fn requires_comment(&self, action: Action) -> bool {
    self.comment_required.contains(&action)
  }

  pub fn is_redacted(&self, field: &str) -> bool { self.redacted.iter().any(|f| f == field) }
}
