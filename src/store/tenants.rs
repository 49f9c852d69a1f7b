//! Tenant-keyed rule store with copy-on-write snapshots.
//!
//! Readers get an `Arc<RuleSet>` that never changes underneath them. Writers
//! clone the current value, apply a mutation, persist the whole map and only
//! then swap the new value in. A commit lock serializes mutations against
//! reloads of the config file.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, StoreError, ValidationError};
use crate::rules::{InvalidTerm, ResetMode, RuleChange, RuleSet, Setting};
use crate::store::TenantId;
use crate::store::state_file::{Loaded, StateFile};

/// On-disk shape of `config.json`.
#[derive(Debug, Default, Deserialize)]
struct TenantsFile {
    #[serde(default)]
    tenants: BTreeMap<TenantId, RuleSet>,
}

#[derive(Serialize)]
struct TenantsView<'a> {
    tenants: BTreeMap<&'a TenantId, &'a RuleSet>,
}

type TenantMap = HashMap<TenantId, Arc<RuleSet>>;

/// Shared, persisted store of every tenant's rule set.
pub struct TenantStore {
    tenants: RwLock<TenantMap>,
    file: StateFile,
    /// Text of the config file as last written or loaded by this process.
    commit: Mutex<Option<String>>,
}

impl TenantStore {
    /// Open the store, loading `path` if it exists. A corrupt file is
    /// recovered from its backup.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            tenants: RwLock::new(HashMap::new()),
            file: StateFile::new(path),
            commit: Mutex::new(None),
        };
        let mut commit = store.commit.lock().await;
        if let Some(loaded) = store.file.load::<TenantsFile>().await? {
            store.install(&mut commit, loaded).await;
        }
        drop(commit);
        Ok(store)
    }

    /// Snapshot of one tenant's rules. Unknown tenants get an empty default.
    pub async fn snapshot(&self, tenant: &TenantId) -> Arc<RuleSet> {
        self.tenants
            .read()
            .await
            .get(tenant)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every tenant, sorted by id.
    pub async fn snapshot_all(&self) -> Vec<(TenantId, Arc<RuleSet>)> {
        let mut all: Vec<_> = self
            .tenants
            .read()
            .await
            .iter()
            .map(|(id, rules)| (id.clone(), Arc::clone(rules)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn contains(&self, tenant: &TenantId) -> bool {
        self.tenants.read().await.contains_key(tenant)
    }

    pub async fn tenant_count(&self) -> usize {
        self.tenants.read().await.len()
    }

    /// Apply `f` to a private copy of the tenant's rules, persist, then publish.
    ///
    /// If `f` returns an error or the write fails, nothing changes. A tenant
    /// that does not exist yet is created from defaults.
    pub async fn mutate<F, R>(&self, tenant: &TenantId, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut RuleSet) -> Result<R, ValidationError>,
    {
        let mut commit = self.commit.lock().await;

        let mut next: TenantMap = self.tenants.read().await.clone();
        let previous = next.get(tenant).cloned();
        let mut rules = previous.as_deref().cloned().unwrap_or_default();

        let out = f(&mut rules)?;
        let invalid = rules.compile();
        let known: Vec<InvalidTerm> = previous.map(|p| p.invalid_terms()).unwrap_or_default();
        log_new_invalid(tenant, &known, &invalid);

        next.insert(tenant.clone(), Arc::new(rules));
        let raw = self.file.save(&view(&next)).await?;

        *self.tenants.write().await = next;
        *commit = Some(raw);
        debug!(tenant = %tenant, "Tenant rules committed");
        Ok(out)
    }

    /// Register a tenant on first contact. Returns true if it was created.
    pub async fn ensure_tenant(&self, tenant: &TenantId) -> Result<bool, Error> {
        if self.contains(tenant).await {
            return Ok(false);
        }
        self.mutate(tenant, |_| Ok(())).await?;
        info!(tenant = %tenant, "New tenant registered");
        Ok(true)
    }

    pub async fn add_or_merge_rule(
        &self,
        tenant: &TenantId,
        word: &str,
        include_add: &[String],
        exclude_add: &[String],
        reset: ResetMode,
    ) -> Result<RuleChange, Error> {
        self.mutate(tenant, |rules| {
            rules.add_or_merge_rule(word, include_add, exclude_add, reset)
        })
        .await
    }

    pub async fn delete_rule(&self, tenant: &TenantId, word: &str) -> Result<bool, Error> {
        self.mutate(tenant, |rules| Ok(rules.delete_rule(word))).await
    }

    pub async fn block_global(&self, tenant: &TenantId, term: &str) -> Result<bool, Error> {
        self.mutate(tenant, |rules| Ok(rules.block_global(term))).await
    }

    pub async fn unblock_global(&self, tenant: &TenantId, term: &str) -> Result<bool, Error> {
        self.mutate(tenant, |rules| Ok(rules.unblock_global(term))).await
    }

    pub async fn set_setting(&self, tenant: &TenantId, setting: Setting) -> Result<(), Error> {
        self.mutate(tenant, |rules| rules.set_setting(setting)).await
    }

    /// Re-read the config file to pick up out-of-band edits.
    ///
    /// Returns true when new content was applied. An unchanged or missing
    /// file keeps the current in-memory state, and so does an unreadable one,
    /// which is reported as an error without consulting the backup.
    pub async fn reload(&self) -> Result<bool, StoreError> {
        let mut commit = self.commit.lock().await;

        let Some(loaded) = self.file.load_primary::<TenantsFile>().await? else {
            return Ok(false);
        };
        if commit.as_deref() == Some(loaded.raw.as_str()) {
            return Ok(false);
        }
        self.install(&mut commit, loaded).await;
        Ok(true)
    }

    async fn install(&self, commit: &mut Option<String>, loaded: Loaded<TenantsFile>) {
        let current = self.tenants.read().await.clone();
        let mut next = TenantMap::with_capacity(loaded.value.tenants.len());
        for (tenant, mut rules) in loaded.value.tenants {
            let invalid = rules.compile();
            let known = current
                .get(&tenant)
                .map(|p| p.invalid_terms())
                .unwrap_or_default();
            log_new_invalid(&tenant, &known, &invalid);
            next.insert(tenant, Arc::new(rules));
        }

        info!(
            path = %self.file.path().display(),
            tenants = next.len(),
            "Loaded tenant config"
        );
        *self.tenants.write().await = next;
        *commit = Some(loaded.raw);
    }

    /// Write the current state to disk.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let mut commit = self.commit.lock().await;
        let tenants = self.tenants.read().await;
        let raw = self.file.save(&view(&tenants)).await?;
        *commit = Some(raw);
        Ok(())
    }
}

fn view(tenants: &TenantMap) -> TenantsView<'_> {
    TenantsView {
        tenants: tenants.iter().map(|(id, rules)| (id, rules.as_ref())).collect(),
    }
}

/// Log each invalid term once: only those not already invalid before.
fn log_new_invalid(tenant: &TenantId, known: &[InvalidTerm], invalid: &[InvalidTerm]) {
    let known: HashSet<(&Option<String>, &str)> =
        known.iter().map(|t| (&t.rule, t.term.as_str())).collect();
    for term in invalid {
        if known.contains(&(&term.rule, term.term.as_str())) {
            continue;
        }
        match &term.rule {
            Some(rule) if *rule == term.term => warn!(
                tenant = %tenant,
                rule = %rule,
                reason = %term.reason,
                "Invalid regex, rule inactive"
            ),
            Some(rule) => warn!(
                tenant = %tenant,
                rule = %rule,
                term = %term.term,
                reason = %term.reason,
                "Invalid regex term ignored"
            ),
            None => warn!(
                tenant = %tenant,
                term = %term.term,
                reason = %term.reason,
                "Invalid regex block term ignored"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> TenantStore {
        TenantStore::open(dir.path().join("config.json")).await.unwrap()
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::from(id)
    }

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_store_yields_default_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let rules = store.snapshot(&tenant("1")).await;
        assert_eq!(rules.rule_count(), 0);
        assert_eq!(store.tenant_count().await, 0);
    }

    #[tokio::test]
    async fn mutation_persists_and_reopens() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store
                .add_or_merge_rule(&tenant("1"), "mk", &s(&["出"]), &[], ResetMode::None)
                .await
                .unwrap();
            store.block_global(&tenant("1"), "骗子").await.unwrap();
        }
        let store = open_store(&dir).await;
        let rules = store.snapshot(&tenant("1")).await;
        assert_eq!(rules.rule_count(), 1);
        assert_eq!(rules.global_exclude().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_later_mutation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .add_or_merge_rule(&tenant("1"), "a", &[], &[], ResetMode::None)
            .await
            .unwrap();
        let before = store.snapshot(&tenant("1")).await;
        store
            .add_or_merge_rule(&tenant("1"), "b", &[], &[], ResetMode::None)
            .await
            .unwrap();
        assert_eq!(before.rule_count(), 1);
        assert_eq!(store.snapshot(&tenant("1")).await.rule_count(), 2);
    }

    #[tokio::test]
    async fn failed_validation_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let result = store
            .set_setting(&tenant("1"), Setting::Interval { min: 50, max: 10 })
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(!store.contains(&tenant("1")).await);
        assert!(!dir.path().join("config.json").exists());
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store.block_global(&tenant("1"), "x").await.unwrap();
        store
            .add_or_merge_rule(&tenant("2"), "y", &[], &[], ResetMode::None)
            .await
            .unwrap();
        assert_eq!(store.snapshot(&tenant("1")).await.rule_count(), 0);
        assert!(store.snapshot(&tenant("2")).await.global_exclude().is_empty());
    }

    #[tokio::test]
    async fn ensure_tenant_creates_once() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert!(store.ensure_tenant(&tenant("9")).await.unwrap());
        assert!(!store.ensure_tenant(&tenant("9")).await.unwrap());
        assert_eq!(store.tenant_count().await, 1);
    }

    #[tokio::test]
    async fn reload_picks_up_external_edit() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .add_or_merge_rule(&tenant("1"), "a", &[], &[], ResetMode::None)
            .await
            .unwrap();
        assert!(!store.reload().await.unwrap());

        let edited = r#"{"tenants": {"1": {"keywords": ["a", "b"]}, "2": {"keywords": ["c"]}}}"#;
        std::fs::write(dir.path().join("config.json"), edited).unwrap();

        assert!(store.reload().await.unwrap());
        assert_eq!(store.snapshot(&tenant("1")).await.rule_count(), 2);
        assert_eq!(store.tenant_count().await, 2);
        assert!(!store.reload().await.unwrap());
    }

    #[tokio::test]
    async fn reload_keeps_latest_state_when_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .add_or_merge_rule(&tenant("1"), "a", &[], &[], ResetMode::None)
            .await
            .unwrap();
        store
            .add_or_merge_rule(&tenant("1"), "b", &[], &[], ResetMode::None)
            .await
            .unwrap();
        std::fs::write(dir.path().join("config.json"), "{ truncated").unwrap();

        assert!(store.reload().await.is_err());
        let rules = store.snapshot(&tenant("1")).await;
        assert_eq!(rules.rule_count(), 2);
        assert!(rules.rule("b").is_some());
        let primary = std::fs::read_to_string(dir.path().join("config.json")).unwrap();
        assert_eq!(primary, "{ truncated");

        store.flush().await.unwrap();
        let reopened = open_store(&dir).await;
        assert_eq!(reopened.snapshot(&tenant("1")).await.rule_count(), 2);
    }

    #[tokio::test]
    async fn open_recovers_corrupt_file_from_backup() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir).await;
            store
                .add_or_merge_rule(&tenant("1"), "a", &[], &[], ResetMode::None)
                .await
                .unwrap();
            store
                .add_or_merge_rule(&tenant("1"), "b", &[], &[], ResetMode::None)
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join("config.json"), "{ truncated").unwrap();

        let store = open_store(&dir).await;
        let rules = store.snapshot(&tenant("1")).await;
        assert_eq!(rules.rule_count(), 1);
        assert!(rules.rule("a").is_some());
    }

    #[tokio::test]
    async fn reload_compiles_regex_rules() {
        let dir = TempDir::new().unwrap();
        let edited = r#"{"tenants": {"1": {"keywords": ["m\\d+", "(bad"], "settings": {"regex_match": true}}}}"#;
        std::fs::write(dir.path().join("config.json"), edited).unwrap();
        let store = open_store(&dir).await;
        let rules = store.snapshot(&tenant("1")).await;
        assert!(rules.rule("m\\d+").unwrap().compiled_pattern().is_some());
        assert_eq!(rules.invalid_terms().len(), 1);
    }
}
