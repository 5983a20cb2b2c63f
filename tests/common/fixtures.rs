//! Fixture schema and registry.
//!
//! ```text
//! companies ─┬─< contacts           (crm: Company depends on contacts)
//!            ├─< deals              (billing: Company depends on deals)
//!            ├─< taggings >── tags  (crm: through, taggable_type = 'Company')
//!            └─< notes              (notable_type / notable_id, polymorphic)
//! ```
//!
//! Every `updated_at` is unix milliseconds. Companies sync to `crm` and
//! `billing`, contacts and notes to `crm` only.

use super::MockDestination;
use chrono::{TimeZone, Utc};
use outbound_sync::registry::{
    Association, DestinationBinding, DestinationOptions, EntityType, FnSerializer, Registry, Table, ThroughSource,
};
use outbound_sync::state::{SyncState, SyncStateStore};
use outbound_sync::StalenessFinder;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// 2025-01-01T12:00:00Z in milliseconds.
pub const T0: i64 = 1_735_732_800_000;

const SCHEMA: &str = r#"
CREATE TABLE companies (id INTEGER PRIMARY KEY, name TEXT NOT NULL, domain TEXT, updated_at INTEGER);
CREATE TABLE contacts (id INTEGER PRIMARY KEY, company_id INTEGER, email TEXT, updated_at INTEGER);
CREATE TABLE deals (id INTEGER PRIMARY KEY, company_id INTEGER, title TEXT, updated_at INTEGER);
CREATE TABLE tags (id INTEGER PRIMARY KEY, name TEXT, updated_at INTEGER);
CREATE TABLE taggings (id INTEGER PRIMARY KEY, taggable_type TEXT, taggable_id INTEGER, tag_id INTEGER, updated_at INTEGER);
CREATE TABLE notes (id INTEGER PRIMARY KEY, notable_type TEXT, notable_id INTEGER, body TEXT, updated_at INTEGER);
"#;

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Registry over the fixture schema with `crm` and `billing` registered.
pub fn fixture_registry(crm: Arc<MockDestination>, billing: Arc<MockDestination>) -> Registry {
    let mut registry = Registry::new();
    registry
        .register_destination("crm", crm, DestinationOptions::default())
        .unwrap();
    registry
        .register_destination(
            "billing",
            billing,
            DestinationOptions {
                queue: "billing_sync".to_string(),
            },
        )
        .unwrap();

    let company_payload = |r: &outbound_sync::Record| -> outbound_sync::Result<Map<String, Value>> {
        Ok(object(json!({"name": r.get_str("name"), "domain": r.get_str("domain")})))
    };

    registry
        .declare_entity(
            EntityType::new("Company", "companies")
                .association("contacts", Association::has_many(Table::new("contacts"), "company_id"))
                .association("deals", Association::has_many(Table::new("deals"), "company_id"))
                .association(
                    "tags",
                    Association::through(
                        Table::new("taggings"),
                        "taggable_id",
                        ThroughSource::BelongsTo {
                            foreign_key: "tag_id".to_string(),
                        },
                        Table::new("tags"),
                    )
                    .owned_as("taggable_type"),
                )
                .association(
                    "notes",
                    Association::has_many(Table::new("notes"), "notable_id").owned_as("notable_type"),
                )
                .sync_to(
                    "crm",
                    DestinationBinding::new("companies", FnSerializer::new(company_payload))
                        .identity("domain")
                        .depends_on(["contacts", "tags", "notes"]),
                )
                .sync_to(
                    "billing",
                    DestinationBinding::new("accounts", FnSerializer::new(company_payload)).depends_on(["deals"]),
                ),
        )
        .unwrap();

    registry
        .declare_entity(
            EntityType::new("Contact", "contacts")
                .association("company", Association::belongs_to(Table::new("companies"), "company_id"))
                .sync_to(
                    "crm",
                    DestinationBinding::new(
                        "contacts",
                        FnSerializer::new(|r| Ok(object(json!({"email": r.get_str("email")})))),
                    )
                    .depends_on(["company"])
                    .guard(|r| r.get_str("email").is_some()),
                ),
        )
        .unwrap();

    registry
        .declare_entity(
            EntityType::new("Note", "notes")
                .association("notable", Association::polymorphic("notable_id", "notable_type"))
                .sync_to(
                    "crm",
                    DestinationBinding::new("notes", FnSerializer::new(|r| Ok(object(json!({"body": r.get_str("body")})))))
                        .depends_on(["notable"]),
                ),
        )
        .unwrap();

    registry
}

/// A migrated temp database with the fixture schema and registry.
pub struct Fixture {
    /// Kept alive for the database file's lifetime.
    pub dir: TempDir,
    pub store: SyncStateStore,
    pub registry: Arc<Registry>,
    pub crm: Arc<MockDestination>,
    pub billing: Arc<MockDestination>,
}

impl Fixture {
    pub async fn new() -> Self {
        super::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let store = SyncStateStore::connect(dir.path().join("app.db"), 4).await.unwrap();
        store.migrate().await.unwrap();
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(store.pool()).await.unwrap();
        }

        let crm = Arc::new(MockDestination::new());
        let billing = Arc::new(MockDestination::new());
        let registry = Arc::new(fixture_registry(crm.clone(), billing.clone()));
        Self {
            dir,
            store,
            registry,
            crm,
            billing,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }

    pub fn finder(&self) -> StalenessFinder {
        StalenessFinder::new(self.registry.clone(), self.pool().clone())
    }

    pub async fn exec(&self, sql: &str) {
        sqlx::query(sql).execute(self.pool()).await.unwrap();
    }

    pub async fn insert_company(&self, id: i64, name: &str, updated_at: i64) {
        sqlx::query("INSERT INTO companies (id, name, domain, updated_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(format!("{}.example.com", name))
            .bind(updated_at)
            .execute(self.pool())
            .await
            .unwrap();
    }

    pub async fn insert_contact(&self, id: i64, company_id: i64, updated_at: i64) {
        sqlx::query("INSERT INTO contacts (id, company_id, email, updated_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(company_id)
            .bind(format!("c{}@example.com", id))
            .bind(updated_at)
            .execute(self.pool())
            .await
            .unwrap();
    }

    pub async fn insert_deal(&self, id: i64, company_id: i64, updated_at: i64) {
        sqlx::query("INSERT INTO deals (id, company_id, title, updated_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(company_id)
            .bind(format!("deal {}", id))
            .bind(updated_at)
            .execute(self.pool())
            .await
            .unwrap();
    }

    pub async fn insert_note(&self, id: i64, notable_type: Option<&str>, notable_id: i64, updated_at: i64) {
        sqlx::query("INSERT INTO notes (id, notable_type, notable_id, body, updated_at) VALUES (?, ?, ?, ?, ?)")
            .bind(id)
            .bind(notable_type)
            .bind(notable_id)
            .bind(format!("note {}", id))
            .bind(updated_at)
            .execute(self.pool())
            .await
            .unwrap();
    }

    /// Record a successful sync of the pair at `at` milliseconds.
    pub async fn mark_synced(&self, entity_type: &str, id: i64, destination: &str, at: i64) {
        let mut state = self
            .store
            .find_or_init(entity_type, id, destination)
            .await
            .unwrap();
        state.last_synced_at = Utc.timestamp_millis_opt(at).single();
        state.last_digest = Some(format!("digest-{}-{}", entity_type, id));
        self.store.save(&mut state).await.unwrap();
    }

    pub async fn state(&self, entity_type: &str, id: i64, destination: &str) -> Option<SyncState> {
        self.store.find(entity_type, id, destination).await.unwrap()
    }

    /// Stale primary keys for the pair, ascending.
    pub async fn stale_ids(&self, entity_type: &str, destination: &str) -> Vec<i64> {
        let entity = self.registry.entity(entity_type).unwrap();
        let query = self.finder().query_for(entity, destination).await.unwrap();
        query.fetch_all(self.pool()).await.unwrap()
    }
}
