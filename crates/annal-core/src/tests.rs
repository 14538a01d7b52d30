//! End-to-end tests of writer, reconstructor and retention against
//! `MemoryStore`.

use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};

use crate::{
  Error,
  auditable::{Auditable, Tombstone},
  change_set::{Change, ChangeSet},
  config::{AuditConfig, EntityAuditConfig},
  context::{self, RequestContext},
  memory::MemoryStore,
  record::{Action, Actor, Attributes, AuditDraft, EntityRef},
  retention::COMBINED_NOTE,
  revision::{RevisionReconstructor, VersionSelector},
  store::{AuditQuery, AuditStore},
  writer::AuditWriter,
};

// ─── Fixture entity ──────────────────────────────────────────────────────────

/// A host record with dirty tracking, the way an ORM model would have it.
#[derive(Debug, Clone)]
struct Model {
  kind:      &'static str,
  id:        u32,
  saved:     Attributes,
  current:   Attributes,
  persisted: bool,
  parent:    Option<EntityRef>,
}

impl Model {
  fn new(kind: &'static str, id: u32, fields: Value) -> Self {
    let current: Attributes = serde_json::from_value(fields).unwrap();
    Self { kind, id, saved: Attributes::new(), current, persisted: false, parent: None }
  }

  fn set(&mut self, field: &str, value: Value) { self.current.insert(field.into(), value); }

  fn save(&mut self) {
    self.saved = self.current.clone();
    self.persisted = true;
  }
}

impl Auditable for Model {
  fn identity(&self) -> EntityRef { EntityRef::new(self.kind, self.id) }

  fn attributes(&self) -> Attributes {
    let mut attrs = self.current.clone();
    attrs.insert("id".into(), json!(self.id));
    attrs
  }

  fn changed_fields(&self) -> ChangeSet {
    self
      .current
      .iter()
      .map(|(f, new)| {
        let old = self.saved.get(f).cloned().unwrap_or(Value::Null);
        (f.clone(), Change::new(old, new.clone()))
      })
      .collect()
  }

  fn associated(&self) -> Option<EntityRef> { self.parent.clone() }

  fn is_new_record(&self) -> bool { !self.persisted }
}

fn user(name: &str) -> Model {
  Model::new("User", 1, json!({ "name": name, "username": "brandon" }))
}

fn writer(config: AuditConfig) -> AuditWriter<MemoryStore> {
  AuditWriter::new(MemoryStore::new(), config)
}

async fn create(w: &AuditWriter<MemoryStore>, m: &mut Model) {
  w.record_create(&*m, None).await.unwrap().expect("create is always recorded");
  m.save();
}

async fn update(w: &AuditWriter<MemoryStore>, m: &mut Model, field: &str, value: Value) {
  m.set(field, value);
  w.record_update(&*m, None).await.unwrap();
  m.save();
}

async fn trail(w: &AuditWriter<MemoryStore>, m: &Model) -> Vec<crate::record::AuditRecord> {
  w.store().audits(&AuditQuery::for_entity(m.identity())).await.unwrap()
}

// ─── Writing ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_records_version_one_snapshot() {
  let w = writer(AuditConfig::default());
  let mut u = user("Brandon");
  create(&w, &mut u).await;

  let records = trail(&w, &u).await;
  assert_eq!(records.len(), 1);
  let r = &records[0];
  assert_eq!(r.action, Action::Create);
  assert_eq!(r.version, 1);
  assert_eq!(r.change_set.get("name"), Some(&Change::set(json!("Brandon"))));
  // Primary key is on the default ignore-list.
  assert!(!r.change_set.contains("id"));
  assert!(r.request_id.is_some());
}

#[tokio::test]
async fn brandon_scenario() {
  let w = writer(AuditConfig::default());
  let mut u = user("Brandon");
  create(&w, &mut u).await;
  update(&w, &mut u, "name", json!("Changed")).await;

  let records = trail(&w, &u).await;
  assert_eq!(records.len(), 2);
  assert_eq!(records[1].version, 2);
  assert_eq!(
    records[1].change_set.get("name"),
    Some(&Change::new(json!("Brandon"), json!("Changed")))
  );

  let r = RevisionReconstructor::new(w.store());
  let v1 = r.revision_at_version(&u, 1).await.unwrap().unwrap();
  assert_eq!(v1.get("name"), Some(&json!("Brandon")));
  let v2 = r.revision_at_version(&u, 2).await.unwrap().unwrap();
  assert_eq!(v2.get("name"), Some(&json!("Changed")));

  let destroyed = w.record_destroy(&u, None).await.unwrap().unwrap();
  assert_eq!(destroyed.version, 3);
  assert_eq!(destroyed.action, Action::Destroy);
  assert_eq!(destroyed.new_attributes()["username"], json!("brandon"));

  let list = r.revision_list(&u, 1).await.unwrap();
  assert_eq!(list.len(), 3);
  assert_eq!(list.last().unwrap().get("name"), Some(&json!("Changed")));
}

#[tokio::test]
async fn update_without_changes_is_not_recorded() {
  let w = writer(AuditConfig::default());
  let mut u = user("Brandon");
  create(&w, &mut u).await;

  u.set("name", json!("Brandon"));
  assert!(w.record_update(&u, None).await.unwrap().is_none());
  assert!(w.record_update(&u, Some("   ")).await.unwrap().is_none());
  assert_eq!(trail(&w, &u).await.len(), 1);
}

#[tokio::test]
async fn comment_only_update_kept_when_enabled() {
  let w = writer(AuditConfig::default());
  let mut u = user("Brandon");
  create(&w, &mut u).await;

  let r = w.record_update(&u, Some("reviewed")).await.unwrap().unwrap();
  assert_eq!(r.action, Action::Update);
  assert!(r.change_set.is_empty());
  assert_eq!(r.comment.as_deref(), Some("reviewed"));
  assert_eq!(r.version, 2);
}

#[tokio::test]
async fn comment_only_update_skipped_when_disabled() {
  let w = writer(AuditConfig { persist_comment_only_updates: false, ..Default::default() });
  let mut u = user("Brandon");
  create(&w, &mut u).await;

  assert!(w.record_update(&u, Some("reviewed")).await.unwrap().is_none());
  assert_eq!(trail(&w, &u).await.len(), 1);
}

#[tokio::test]
async fn ignored_only_except_and_redacted_fields() {
  let config = AuditConfig::default()
    .with_entity("User", EntityAuditConfig {
      except: vec!["username".into()],
      redacted: vec!["ssn".into()],
      ..Default::default()
    })
    .with_entity("Company", EntityAuditConfig {
      only: vec!["name".into()],
      ..Default::default()
    });
  let w = writer(config);

  let mut u = Model::new("User", 1, json!({ "name": "B", "username": "b", "ssn": "123" }));
  create(&w, &mut u).await;
  let records = trail(&w, &u).await;
  let r = &records[0];
  assert!(!r.change_set.contains("username"));
  assert_eq!(r.change_set.get("ssn"), Some(&Change::set(json!("[REDACTED]"))));

  update(&w, &mut u, "ssn", json!("456")).await;
  let records = trail(&w, &u).await;
  let r = &records[1];
  assert_eq!(
    r.change_set.get("ssn"),
    Some(&Change::new(json!("[REDACTED]"), json!("[REDACTED]")))
  );

  // Only a non-audited field changed: nothing to record.
  update(&w, &mut u, "username", json!("bb")).await;
  assert_eq!(trail(&w, &u).await.len(), 2);

  let mut c = Model::new("Company", 9, json!({ "name": "Acme", "phone": "555" }));
  create(&w, &mut c).await;
  let fields: Vec<_> = trail(&w, &c).await[0].change_set.fields().map(str::to_owned).collect();
  assert_eq!(fields, ["name"]);
}

#[tokio::test]
async fn entity_ignored_fields_are_dropped() {
  struct Secretive(Model);
  impl Auditable for Secretive {
    fn identity(&self) -> EntityRef { self.0.identity() }
    fn attributes(&self) -> Attributes { self.0.attributes() }
    fn changed_fields(&self) -> ChangeSet { self.0.changed_fields() }
    fn ignored_fields(&self) -> std::collections::BTreeSet<String> {
      ["username".to_owned()].into()
    }
  }

  let w = writer(AuditConfig::default());
  let r = w.record_create(&Secretive(user("B")), None).await.unwrap().unwrap();
  assert!(!r.change_set.contains("username"));
  assert!(r.change_set.contains("name"));
}

#[tokio::test]
async fn actions_outside_on_are_skipped() {
  let config = AuditConfig::default().with_entity("User", EntityAuditConfig {
    on: vec![Action::Update],
    ..Default::default()
  });
  let w = writer(config);
  let mut u = user("Brandon");
  assert!(w.record_create(&u, None).await.unwrap().is_none());
  u.save();
  update(&w, &mut u, "name", json!("Changed")).await;
  assert!(w.record_destroy(&u, None).await.unwrap().is_none());

  let records = trail(&w, &u).await;
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].action, Action::Update);
  assert_eq!(records[0].version, 1);
}

#[tokio::test]
async fn destroy_of_unsaved_entity_is_skipped() {
  let w = writer(AuditConfig::default());
  let u = user("Ghost");
  assert!(w.record_destroy(&u, None).await.unwrap().is_none());
  assert!(w.store().is_empty());
}

// ─── Comment policy ──────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_required_comment_is_rejected_before_write() {
  let config = AuditConfig::default().with_entity("User", EntityAuditConfig {
    comment_required: vec![Action::Create, Action::Update],
    ..Default::default()
  });
  let w = writer(config);
  let mut u = user("Brandon");

  let err = w.record_create(&u, None).await.unwrap_err();
  assert!(matches!(
    err,
    Error::CommentRequired { ref entity_type, action: Action::Create } if entity_type == "User"
  ));
  assert!(w.store().is_empty());
  assert!(w.validate_comment("User", Action::Create, Some("")).is_err());

  w.record_create(&u, Some("initial import")).await.unwrap().unwrap();
  u.save();

  u.set("name", json!("Changed"));
  assert!(w.record_update(&u, None).await.is_err());
  // Destroy carries no requirement.
  assert!(w.validate_comment("User", Action::Destroy, None).is_ok());

  // Disabled auditing bypasses the requirement.
  let _off = w.switch().disable("User");
  assert!(w.record_update(&u, None).await.unwrap().is_none());
  assert!(w.validate_comment("User", Action::Update, None).is_ok());
}

// ─── Enable / disable ────────────────────────────────────────────────────────

#[tokio::test]
async fn disabled_scope_writes_nothing() {
  let w = writer(AuditConfig::default());
  let mut u = user("Brandon");

  let recorded = w
    .switch()
    .without_auditing("User", async { w.record_create(&u, None).await.unwrap() })
    .await;
  assert!(recorded.is_none());
  assert!(w.store().is_empty());

  // Other types still audited inside the scope.
  let mut c = Model::new("Company", 2, json!({ "name": "Acme" }));
  {
    let _off = w.switch().disable("User");
    create(&w, &mut c).await;
  }
  assert_eq!(w.store().len(), 1);

  create(&w, &mut u).await;
  assert_eq!(trail(&w, &u).await.len(), 1);
}

#[tokio::test]
async fn disabled_scope_does_not_silence_concurrent_work() {
  let w = writer(AuditConfig::default());
  let quiet = user("Quiet");
  let bystander = Model::new("User", 77, json!({ "name": "Bystander" }));
  let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
  let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

  let silenced = w.switch().without_auditing("User", async {
    entered_tx.send(()).unwrap();
    release_rx.await.unwrap();
    w.record_create(&quiet, None).await.unwrap()
  });
  let recorded = async {
    entered_rx.await.unwrap();
    let r = w.record_create(&bystander, None).await.unwrap();
    release_tx.send(()).unwrap();
    r
  };

  let (silenced, recorded) = tokio::join!(silenced, recorded);
  assert!(silenced.is_none());
  assert_eq!(recorded.expect("bystander is audited").auditable, bystander.identity());
  assert_eq!(w.store().len(), 1);
}

#[tokio::test]
async fn globally_disabled_config() {
  let w = writer(AuditConfig { enabled: false, ..Default::default() });
  let mut u = user("Brandon");
  assert!(w.record_create(&u, None).await.unwrap().is_none());

  let _on = w.switch().enable_all();
  create(&w, &mut u).await;
  assert_eq!(w.store().len(), 1);
}

// ─── Attribution ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn as_actor_names_the_actor() {
  let w = writer(AuditConfig::default());
  let mut company = Model::new("Company", 3, json!({ "name": "Acme" }));

  context::as_actor("alice", create(&w, &mut company)).await;

  let records = trail(&w, &company).await;
  let r = &records[0];
  assert_eq!(r.actor, Some(Actor::named("alice")));
  assert_eq!(r.actor_name(), Some("alice"));
  assert!(r.actor_ref().is_none());
}

#[tokio::test]
async fn request_context_is_recorded() {
  let w = writer(AuditConfig::default());
  let mut u = user("Brandon");
  let ctx = RequestContext::new()
    .with_actor(EntityRef::new("Admin", 42))
    .with_remote_address("1.2.3.4")
    .with_request_id("req-7");

  context::with_request(ctx, create(&w, &mut u)).await;

  let records = trail(&w, &u).await;
  let r = &records[0];
  assert_eq!(r.actor_ref(), Some(&EntityRef::new("Admin", 42)));
  assert_eq!(r.remote_address.as_deref(), Some("1.2.3.4"));
  assert_eq!(r.request_id.as_deref(), Some("req-7"));
}

#[tokio::test]
async fn associated_records_are_queryable() {
  let w = writer(AuditConfig::default());
  let company = EntityRef::new("Company", 5);

  let mut u = user("Brandon");
  u.parent = Some(company.clone());
  create(&w, &mut u).await;
  let mut c = Model::new("Company", 5, json!({ "name": "Acme" }));
  create(&w, &mut c).await;

  let assoc = AuditQuery { associated: Some(company.clone()), ..Default::default() };
  let found = w.store().audits(&assoc).await.unwrap();
  assert_eq!(found.len(), 1);
  assert_eq!(found[0].auditable, u.identity());

  let both = AuditQuery { own_or_associated: Some(company), ..Default::default() };
  assert_eq!(w.store().audits(&both).await.unwrap().len(), 2);
}

// ─── Ordering ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn time_order_matches_version_order() {
  let w = writer(AuditConfig::default());
  let mut u = user("v0");
  create(&w, &mut u).await;
  for i in 1..6 {
    update(&w, &mut u, "name", json!(format!("v{i}"))).await;
  }

  let mut by_time = trail(&w, &u).await;
  by_time.sort_by_key(|r| r.created_at);
  let versions: Vec<u32> = by_time.iter().map(|r| r.version).collect();
  assert_eq!(versions, [1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn duplicate_version_is_a_conflict() {
  let store = MemoryStore::new();
  let draft = AuditDraft::new(EntityRef::new("User", 1), Action::Create, ChangeSet::new());
  let first = store.append(draft.clone()).await.unwrap();

  let mut clash = draft.into_record(first.version, Utc::now());
  clash.audit_id = uuid::Uuid::new_v4();
  let err = store.import(clash).unwrap_err();
  assert!(err.is_write_conflict());
}

// ─── Revisions ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn latest_revision_matches_live_state() {
  let w = writer(AuditConfig::default());
  let mut u = user("Brandon");
  create(&w, &mut u).await;
  update(&w, &mut u, "name", json!("Changed")).await;
  update(&w, &mut u, "username", json!("bk")).await;

  let rev = RevisionReconstructor::new(w.store())
    .revision_at_version(&u, 3)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(rev.attributes, u.attributes());
  assert!(!rev.transient);
  assert!(rev.was_changed("name"));
  assert!(!rev.was_changed("id"));
}

#[tokio::test]
async fn revision_list_tracks_each_state() {
  let w = writer(AuditConfig::default());
  let mut u = user("n0");
  create(&w, &mut u).await;
  let mut states = vec![u.attributes()];
  for i in 1..4 {
    update(&w, &mut u, "name", json!(format!("n{i}"))).await;
    states.push(u.attributes());
  }

  let r = RevisionReconstructor::new(w.store());
  let list = r.revision_list(&u, 1).await.unwrap();
  assert_eq!(list.len(), trail(&w, &u).await.len());
  for (rev, state) in list.iter().zip(&states) {
    assert_eq!(&rev.attributes, state);
  }

  let tail = r.revision_list(&u, 3).await.unwrap();
  assert_eq!(tail.len(), 2);
  assert_eq!(tail[0].version, 3);
  assert_eq!(tail[0].get("name"), Some(&json!("n2")));
  assert!(r.revision_list(&u, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn previous_walks_back_one_step() {
  let w = writer(AuditConfig::default());
  let mut u = user("n1");
  create(&w, &mut u).await;
  update(&w, &mut u, "name", json!("n2")).await;
  update(&w, &mut u, "name", json!("n3")).await;

  let r = RevisionReconstructor::new(w.store());
  let prev = r.revision_at_version(&u, VersionSelector::Previous).await.unwrap().unwrap();
  assert_eq!(prev.version, 2);
  assert_eq!(prev.get("name"), Some(&json!("n2")));

  let prev = r.revision_at_version(&prev, VersionSelector::Previous).await.unwrap().unwrap();
  assert_eq!(prev.version, 1);
  assert_eq!(prev.get("name"), Some(&json!("n1")));

  assert!(r.revision_at_version(&prev, VersionSelector::Previous).await.unwrap().is_none());
}

#[tokio::test]
async fn versions_out_of_range_are_absent() {
  let w = writer(AuditConfig::default());
  let mut u = user("Brandon");
  let r = RevisionReconstructor::new(w.store());
  assert!(r.revision_at_version(&u, 1).await.unwrap().is_none());

  create(&w, &mut u).await;
  assert!(r.revision_at_version(&u, 0).await.unwrap().is_none());
  assert!(r.revision_at_version(&u, 2).await.unwrap().is_none());
  assert!(r.revision_at_version(&u, 1).await.unwrap().is_some());
}

#[tokio::test]
async fn revision_at_time() {
  let w = writer(AuditConfig::default());
  let before = Utc::now();
  tokio::time::sleep(Duration::from_millis(5)).await;

  let mut u = user("Brandon");
  create(&w, &mut u).await;
  tokio::time::sleep(Duration::from_millis(5)).await;
  let after_create = Utc::now();
  tokio::time::sleep(Duration::from_millis(5)).await;
  update(&w, &mut u, "name", json!("Changed")).await;

  let r = RevisionReconstructor::new(w.store());
  assert!(r.revision_at_time(&u, before).await.unwrap().is_none());

  let rev = r.revision_at_time(&u, after_create).await.unwrap().unwrap();
  assert_eq!(rev.version, 1);
  assert_eq!(rev.get("name"), Some(&json!("Brandon")));

  let rev = r.revision_at_time(&u, Utc::now()).await.unwrap().unwrap();
  assert_eq!(rev.get("name"), Some(&json!("Changed")));
}

#[tokio::test]
async fn destroyed_entity_gets_transient_revision() {
  let w = writer(AuditConfig::default());
  let mut u = user("Brandon");
  create(&w, &mut u).await;
  update(&w, &mut u, "name", json!("Changed")).await;
  w.record_destroy(&u, Some("account closed")).await.unwrap().unwrap();

  let tomb = Tombstone::with_fields(u.identity(), ["id", "name", "username", "email"]);
  let r = RevisionReconstructor::new(w.store());
  let rev = r.revision_at_version(&tomb, 3).await.unwrap().unwrap();
  assert!(rev.transient);
  assert_eq!(rev.action, Action::Destroy);
  assert_eq!(rev.get("name"), Some(&json!("Changed")));
  // Known but never audited: blank.
  assert_eq!(rev.get("email"), Some(&Value::Null));

  let records = trail(&w, &u).await;
  let first = &records[0];
  let rev = r.revision_of(&tomb, first).await.unwrap().unwrap();
  assert_eq!(rev.get("name"), Some(&json!("Brandon")));
}

// ─── Retention ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn retention_caps_trail_and_keeps_first_old_values() {
  let max = 3;
  let w = writer(AuditConfig { max_audits: Some(max), ..Default::default() });
  let mut u = user("n0");
  create(&w, &mut u).await;
  for i in 1..=max {
    update(&w, &mut u, "name", json!(format!("n{i}"))).await;
  }

  let records = trail(&w, &u).await;
  assert_eq!(records.len(), max);
  let oldest = &records[0];
  assert_eq!(oldest.version, 2);
  assert_eq!(oldest.change_set.get("name"), Some(&Change::new(Value::Null, json!("n1"))));
  assert_eq!(oldest.change_set.get("username"), Some(&Change::set(json!("brandon"))));
  assert!(oldest.comment.as_deref().unwrap().ends_with(COMBINED_NOTE));

  // The combined trail still replays to the live state.
  let rev = RevisionReconstructor::new(w.store())
    .revision_at_version(&u, VersionSelector::Exact(4))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(rev.attributes, u.attributes());
}

#[tokio::test]
async fn retention_cap_of_one_folds_into_newest() {
  let config = AuditConfig::default().with_entity("User", EntityAuditConfig {
    max_audits: Some(1),
    ..Default::default()
  });
  let w = writer(config);
  let mut u = user("n0");
  create(&w, &mut u).await;
  u.set("name", json!("n1"));
  let r = w.record_update(&u, Some("rename")).await.unwrap().unwrap();

  assert_eq!(r.version, 2);
  assert_eq!(r.comment.as_deref(), Some(format!("rename\n{COMBINED_NOTE}").as_str()));
  assert_eq!(r.change_set.get("name"), Some(&Change::new(Value::Null, json!("n1"))));
  assert_eq!(trail(&w, &u).await, vec![r]);
}

#[tokio::test]
async fn retention_not_triggered_by_create() {
  let w = writer(AuditConfig { max_audits: Some(1), ..Default::default() });
  let mut a = Model::new("User", 1, json!({ "name": "a" }));
  let mut b = Model::new("User", 2, json!({ "name": "b" }));
  create(&w, &mut a).await;
  create(&w, &mut b).await;
  assert_eq!(w.store().len(), 2);
}

/// Delegates to `MemoryStore` but cannot rewrite records.
struct NoCombineStore(MemoryStore);

impl AuditStore for NoCombineStore {
  type Error = Error;

  async fn append(&self, draft: AuditDraft) -> crate::Result<crate::record::AuditRecord> {
    self.0.append(draft).await
  }

  async fn get_audit(
    &self,
    audit_id: uuid::Uuid,
  ) -> crate::Result<Option<crate::record::AuditRecord>> {
    self.0.get_audit(audit_id).await
  }

  async fn max_version(&self, entity: &EntityRef) -> crate::Result<Option<u32>> {
    self.0.max_version(entity).await
  }

  async fn count(&self, entity: &EntityRef) -> crate::Result<usize> {
    self.0.count(entity).await
  }

  async fn audits(&self, query: &AuditQuery) -> crate::Result<Vec<crate::record::AuditRecord>> {
    self.0.audits(query).await
  }

  async fn replace_combined(
    &self,
    merged: &crate::record::AuditRecord,
    _absorbed: &[uuid::Uuid],
  ) -> crate::Result<()> {
    Err(Error::AuditNotFound(merged.audit_id))
  }
}

#[tokio::test]
async fn failed_retention_does_not_fail_the_write() {
  let config = AuditConfig { max_audits: Some(1), ..Default::default() };
  let w = AuditWriter::new(NoCombineStore(MemoryStore::new()), config);
  let mut u = user("n0");

  w.record_create(&u, None).await.unwrap().unwrap();
  u.save();
  u.set("name", json!("n1"));
  let r = w.record_update(&u, None).await.unwrap().unwrap();

  assert_eq!(r.version, 2);
  assert_eq!(r.comment, None);
  assert_eq!(w.store().0.len(), 2);
}
