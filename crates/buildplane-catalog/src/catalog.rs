//! BuildCatalog: typed build records over a flat object store.
//!
//! Listing turns raw keys into builds: every key under the product prefix
//! is classified by its last segment, each status marker instantiates a build
//! (its id is the second-to-last segment), and the remaining markers are
//! joined onto matching ids. Filtering, sorting and paging happen in memory.
//!
//! The catalog does not serialize concurrent writers on one build. A single
//! orchestrator owns a build for its whole pipeline run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use buildplane_core::{
    BuildConfiguration, BuildKey, BuildReport, BuildStatus, BuildTag, ConditionCheckReport,
    ConditionPhase, InputReport, QaConfiguration, build_id_at,
};
use buildplane_store::ObjectStore;

use crate::build::Build;
use crate::cache::BuildIdCache;
use crate::error::{CatalogError, CatalogResult};
use crate::marker::Marker;
use crate::paths::{self, ArtifactKind, InputReportKind};
use crate::query::{BuildQuery, Page};
use crate::status::StatusMachine;

/// Build metadata catalog.
#[derive(Clone)]
pub struct BuildCatalog {
    store: Arc<dyn ObjectStore>,
    cache: Arc<BuildIdCache>,
    machine: StatusMachine,
}

impl BuildCatalog {
    pub fn new(store: Arc<dyn ObjectStore>, offline_mode: bool) -> Self {
        Self {
            store,
            cache: Arc::new(BuildIdCache::new()),
            machine: StatusMachine::new(offline_mode),
        }
    }

    /// Share an id cache with other catalog handles.
    pub fn with_cache(mut self, cache: Arc<BuildIdCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn status_machine(&self) -> StatusMachine {
        self.machine
    }

    // ── Create / save ──────────────────────────────────────────────

    /// Create a build stamped with the current time.
    pub fn create(
        &self,
        center: &str,
        product: &str,
        configuration: BuildConfiguration,
        qa_configuration: Option<QaConfiguration>,
    ) -> CatalogResult<Build> {
        self.create_at(center, product, Utc::now(), configuration, qa_configuration)
    }

    /// Create a build whose id is derived from `created`.
    pub fn create_at(
        &self,
        center: &str,
        product: &str,
        created: DateTime<Utc>,
        configuration: BuildConfiguration,
        qa_configuration: Option<QaConfiguration>,
    ) -> CatalogResult<Build> {
        let key = BuildKey::new(center, product, &build_id_at(created));
        if self.exists(&key)? {
            return Err(CatalogError::BadConfiguration(format!(
                "build {key} already exists"
            )));
        }
        let mut build = Build::new(key).with_configuration(configuration);
        build.qa_configuration = qa_configuration;
        self.save(&build)?;
        info!(build = %build.key, "build created");
        Ok(build)
    }

    /// Persist the status marker and any configuration blobs carried by `build`.
    ///
    /// Marker-derived attributes other than status are written through their
    /// own update operations.
    pub fn save(&self, build: &Build) -> CatalogResult<()> {
        self.replace_marker(&build.key, Marker::Status(build.status))?;
        if let Some(configuration) = &build.configuration {
            self.save_configuration(&build.key, configuration)?;
        }
        if let Some(qa_configuration) = &build.qa_configuration {
            self.save_qa_configuration(&build.key, qa_configuration)?;
        }

        if let Some(known) = self.cache.get(&build.key.center, &build.key.product) {
            if !known.contains(build.id()) {
                let mut ids = (*known).clone();
                ids.insert(build.id().to_string());
                self.cache.replace(&build.key.center, &build.key.product, ids);
            }
        }
        debug!(build = %build.key, status = %build.status, "build saved");
        Ok(())
    }

    /// Whether a status marker exists for `key`.
    pub fn exists(&self, key: &BuildKey) -> CatalogResult<bool> {
        Ok(!self.persisted_statuses(key)?.is_empty())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Look up one build by id.
    ///
    /// Soft-deleted and hidden builds are returned; only listings filter them.
    pub fn find(&self, key: &BuildKey, query: &BuildQuery) -> CatalogResult<Option<Build>> {
        let keys = self.store.list(&paths::build_prefix(key))?;
        let found = join_listing(&key.center, &key.product, &keys)
            .into_iter()
            .find(|build| build.key == *key);
        match found {
            Some(mut build) => {
                self.load_extras(&mut build, query)?;
                Ok(Some(build))
            }
            None => Ok(None),
        }
    }

    /// Like [`find`](Self::find) with default filters, failing with `NotFound`.
    pub fn require(&self, key: &BuildKey) -> CatalogResult<Build> {
        self.find(key, &BuildQuery::default())?
            .ok_or_else(|| CatalogError::NotFound(format!("build {key}")))
    }

    /// All builds of a product matching `query`, newest first unless sorted.
    pub fn find_all(
        &self,
        center: &str,
        product: &str,
        query: &BuildQuery,
    ) -> CatalogResult<Page<Build>> {
        let builds = match self.cache.get(center, product) {
            Some(ids) => self.fetch_each(center, product, &ids)?,
            None => self.list_product(center, product)?,
        };

        let admitted: Vec<Build> = builds.into_iter().filter(|b| query.admits(b)).collect();
        let mut page = query.paginate(admitted);
        for build in &mut page.content {
            self.load_extras(build, query)?;
        }
        debug!(%center, %product, total = page.total_elements, "builds listed");
        Ok(page)
    }

    /// Drop every cached build-id set.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Full listing of the product prefix; refreshes the id cache.
    fn list_product(&self, center: &str, product: &str) -> CatalogResult<Vec<Build>> {
        let keys = self.store.list(&paths::product_prefix(center, product))?;
        let builds = join_listing(center, product, &keys);
        let ids: BTreeSet<String> = builds.iter().map(|b| b.id().to_string()).collect();
        self.cache.replace(center, product, ids);
        Ok(builds)
    }

    /// Fetch each cached id under its own prefix, in parallel.
    fn fetch_each(
        &self,
        center: &str,
        product: &str,
        ids: &BTreeSet<String>,
    ) -> CatalogResult<Vec<Build>> {
        let fetched: Vec<Option<Build>> = ids
            .par_iter()
            .map(|id| -> CatalogResult<Option<Build>> {
                let key = BuildKey::new(center, product, id);
                let keys = self.store.list(&paths::build_prefix(&key))?;
                Ok(join_listing(center, product, &keys).into_iter().next())
            })
            .collect::<CatalogResult<_>>()?;
        // Ids erased by another process since the listing simply vanish.
        let mut builds: Vec<Build> = fetched.into_iter().flatten().collect();
        builds.sort_by(|a, b| b.key.build_id.cmp(&a.key.build_id));
        Ok(builds)
    }

    fn load_extras(&self, build: &mut Build, query: &BuildQuery) -> CatalogResult<()> {
        if query.include_config {
            build.configuration = self.load_configuration(&build.key)?;
        }
        if query.include_qa_config {
            build.qa_configuration = self.load_qa_configuration(&build.key)?;
        }
        if query.include_validation_url {
            build.validation_url = self.validation_url(&build.key)?;
        }
        Ok(())
    }

    // ── Markers ────────────────────────────────────────────────────

    /// Every marker currently stored under the build prefix, with its key.
    fn markers(&self, key: &BuildKey) -> CatalogResult<Vec<(String, Marker)>> {
        let prefix = paths::product_prefix(&key.center, &key.product);
        let markers = self
            .store
            .list(&paths::build_prefix(key))?
            .into_iter()
            .filter_map(|object_key| {
                let (_, segment) = paths::split_build_key(&prefix, &object_key)?;
                let marker = Marker::parse(segment)?;
                Some((object_key, marker))
            })
            .collect();
        Ok(markers)
    }

    fn persisted_statuses(&self, key: &BuildKey) -> CatalogResult<Vec<(String, BuildStatus)>> {
        Ok(self
            .markers(key)?
            .into_iter()
            .filter_map(|(object_key, marker)| match marker {
                Marker::Status(status) => Some((object_key, status)),
                _ => None,
            })
            .collect())
    }

    /// Write `marker`, then delete every other marker of the same kind.
    fn replace_marker(&self, key: &BuildKey, marker: Marker) -> CatalogResult<()> {
        let kind = marker.kind();
        let stale: Vec<String> = self
            .markers(key)?
            .into_iter()
            .filter(|(_, existing)| existing.kind() == kind)
            .map(|(object_key, _)| object_key)
            .collect();

        let new_key = paths::object_key(key, &marker.segment());
        self.store.put(&new_key, &[])?;
        for old_key in stale.iter().filter(|old| **old != new_key) {
            self.store.delete(old_key)?;
        }
        Ok(())
    }

    /// Move a build to `status`.
    ///
    /// The prior status is taken from storage when a marker is present and
    /// from `build` otherwise (e.g. the creation marker has not landed yet).
    /// The new marker is written before the old one is deleted.
    pub fn update_status(&self, build: &mut Build, status: BuildStatus) -> CatalogResult<()> {
        let persisted = self.persisted_statuses(&build.key)?;
        let stored = persisted
            .iter()
            .map(|(_, status)| *status)
            .max_by_key(BuildStatus::marker_precedence);
        let prior = match stored {
            Some(stored) => {
                if stored != build.status {
                    debug!(
                        build = %build.key,
                        held = %build.status,
                        stored = %stored,
                        "held status is stale, using stored status"
                    );
                }
                stored
            }
            None => build.status,
        };

        self.machine.check(prior, status)?;

        let new_key = paths::object_key(&build.key, &Marker::Status(status).segment());
        self.store.put(&new_key, &[])?;
        for (old_key, _) in persisted.iter().filter(|(old_key, _)| *old_key != new_key) {
            self.store.delete(old_key)?;
        }

        build.status = status;
        info!(build = %build.key, from = %prior, to = %status, "build status updated");
        Ok(())
    }

    /// Union `tags` into the stored tag set.
    pub fn add_tags(&self, build: &mut Build, tags: &[BuildTag]) -> CatalogResult<()> {
        let mut merged: BTreeSet<BuildTag> = self
            .markers(&build.key)?
            .into_iter()
            .filter_map(|(_, marker)| match marker {
                Marker::Tags(stored) => Some(stored),
                _ => None,
            })
            .flatten()
            .collect();
        merged.extend(build.tags.iter().copied());
        merged.extend(tags.iter().copied());
        self.replace_tags(build, &merged.into_iter().collect::<Vec<_>>())
    }

    /// Overwrite the tag set.
    pub fn replace_tags(&self, build: &mut Build, tags: &[BuildTag]) -> CatalogResult<()> {
        let ordered: Vec<BuildTag> = tags
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.replace_marker(&build.key, Marker::Tags(ordered.clone()))?;
        info!(build = %build.key, tags = ?ordered, "build tags updated");
        build.tags = ordered;
        Ok(())
    }

    pub fn update_visibility(&self, build: &mut Build, visible: bool) -> CatalogResult<()> {
        self.replace_marker(&build.key, Marker::Visibility(visible))?;
        build.visible = visible;
        info!(build = %build.key, visible, "build visibility updated");
        Ok(())
    }

    /// Record the owning user and their roles.
    pub fn update_owner(&self, build: &mut Build, user: &str, roles: &[String]) -> CatalogResult<()> {
        if user.is_empty() || user.contains('/') {
            return Err(CatalogError::BadConfiguration(format!(
                "invalid user name {user:?}"
            )));
        }
        if let Some(role) = roles
            .iter()
            .find(|role| role.is_empty() || role.contains(['/', ',']))
        {
            return Err(CatalogError::BadConfiguration(format!("invalid role {role:?}")));
        }
        self.replace_marker(&build.key, Marker::User(user.to_string()))?;
        self.replace_marker(&build.key, Marker::Roles(roles.to_vec()))?;
        build.user = Some(user.to_string());
        build.roles = roles.to_vec();
        info!(build = %build.key, %user, "build owner updated");
        Ok(())
    }

    /// Soft-delete: keep every object, hide the build from listings.
    pub fn mark_deleted(&self, build: &mut Build) -> CatalogResult<()> {
        self.replace_marker(&build.key, Marker::Deleted)?;
        build.deleted = true;
        info!(build = %build.key, "build marked as deleted");
        Ok(())
    }

    /// Administrative delete: erase every object under the build prefix.
    pub fn delete(&self, key: &BuildKey) -> CatalogResult<usize> {
        let keys = self.store.list(&paths::build_prefix(key))?;
        if keys.is_empty() {
            return Err(CatalogError::NotFound(format!("build {key}")));
        }
        for object_key in &keys {
            self.store.delete(object_key)?;
        }

        if let Some(known) = self.cache.get(&key.center, &key.product) {
            let ids: BTreeSet<String> = known
                .iter()
                .filter(|id| **id != key.build_id)
                .cloned()
                .collect();
            self.cache.replace(&key.center, &key.product, ids);
        }
        info!(build = %key, objects = keys.len(), "build erased");
        Ok(keys.len())
    }

    // ── JSON blobs ─────────────────────────────────────────────────

    pub fn put_json<T: Serialize>(&self, object_key: &str, value: &T) -> CatalogResult<()> {
        let data =
            serde_json::to_vec_pretty(value).map_err(|e| CatalogError::Serialize(e.to_string()))?;
        self.store.put(object_key, &data)?;
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, object_key: &str) -> CatalogResult<Option<T>> {
        match self.store.get(object_key)? {
            Some(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| CatalogError::Deserialize {
                    key: object_key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn load_configuration(&self, key: &BuildKey) -> CatalogResult<Option<BuildConfiguration>> {
        self.get_json(&paths::object_key(key, paths::CONFIG))
    }

    pub fn save_configuration(
        &self,
        key: &BuildKey,
        configuration: &BuildConfiguration,
    ) -> CatalogResult<()> {
        self.put_json(&paths::object_key(key, paths::CONFIG), configuration)
    }

    pub fn load_qa_configuration(&self, key: &BuildKey) -> CatalogResult<Option<QaConfiguration>> {
        self.get_json(&paths::object_key(key, paths::QA_CONFIG))
    }

    pub fn save_qa_configuration(
        &self,
        key: &BuildKey,
        qa_configuration: &QaConfiguration,
    ) -> CatalogResult<()> {
        self.put_json(&paths::object_key(key, paths::QA_CONFIG), qa_configuration)
    }

    pub fn load_report(&self, key: &BuildKey) -> CatalogResult<Option<BuildReport>> {
        self.get_json(&paths::object_key(key, paths::REPORT))
    }

    pub fn save_report(&self, key: &BuildKey, report: &BuildReport) -> CatalogResult<()> {
        self.put_json(&paths::object_key(key, paths::REPORT), report)
    }

    pub fn load_condition_report(
        &self,
        key: &BuildKey,
        phase: ConditionPhase,
    ) -> CatalogResult<Option<Vec<ConditionCheckReport>>> {
        self.get_json(&condition_report_key(key, phase))
    }

    pub fn save_condition_report(
        &self,
        key: &BuildKey,
        phase: ConditionPhase,
        findings: &[ConditionCheckReport],
    ) -> CatalogResult<()> {
        self.put_json(&condition_report_key(key, phase), &findings)
    }

    pub fn load_input_report(
        &self,
        key: &BuildKey,
        kind: InputReportKind,
    ) -> CatalogResult<Option<InputReport>> {
        self.get_json(&paths::object_key(key, kind.object_name()))
    }

    pub fn save_input_report(
        &self,
        key: &BuildKey,
        kind: InputReportKind,
        report: &InputReport,
    ) -> CatalogResult<()> {
        self.put_json(&paths::object_key(key, kind.object_name()), report)
    }

    pub fn validation_url(&self, key: &BuildKey) -> CatalogResult<Option<String>> {
        let data = self
            .store
            .get(&paths::object_key(key, paths::VALIDATION_URL))?;
        Ok(data.map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string()))
    }

    pub fn save_validation_url(&self, key: &BuildKey, url: &str) -> CatalogResult<()> {
        self.store
            .put(&paths::object_key(key, paths::VALIDATION_URL), url.as_bytes())?;
        Ok(())
    }

    pub fn load_validation_report(&self, key: &BuildKey) -> CatalogResult<Option<serde_json::Value>> {
        self.get_json(&paths::object_key(key, paths::VALIDATION_REPORT))
    }

    pub fn save_validation_report(
        &self,
        key: &BuildKey,
        report: &serde_json::Value,
    ) -> CatalogResult<()> {
        self.put_json(&paths::object_key(key, paths::VALIDATION_REPORT), report)
    }

    // ── Comparison reports ─────────────────────────────────────────

    pub fn save_comparison<T: Serialize>(&self, compare_id: &str, report: &T) -> CatalogResult<()> {
        self.put_json(&paths::comparison_key(compare_id), report)
    }

    pub fn load_comparison<T: DeserializeOwned>(&self, compare_id: &str) -> CatalogResult<Option<T>> {
        self.get_json(&paths::comparison_key(compare_id))
    }

    pub fn save_file_diff<T: Serialize>(
        &self,
        compare_id: &str,
        file_name: &str,
        report: &T,
    ) -> CatalogResult<()> {
        self.put_json(&paths::file_diff_key(compare_id, file_name), report)
    }

    pub fn load_file_diff<T: DeserializeOwned>(
        &self,
        compare_id: &str,
        file_name: &str,
    ) -> CatalogResult<Option<T>> {
        self.get_json(&paths::file_diff_key(compare_id, file_name))
    }

    /// Keys of every stored comparison and file-diff report.
    pub fn comparison_keys(&self) -> CatalogResult<Vec<String>> {
        Ok(self.store.list(&paths::comparisons_prefix())?)
    }

    // ── Artifact files ─────────────────────────────────────────────

    pub fn put_file(
        &self,
        key: &BuildKey,
        kind: ArtifactKind,
        file_name: &str,
        data: &[u8],
    ) -> CatalogResult<()> {
        self.store
            .put(&paths::artifact_key(key, kind, file_name), data)?;
        debug!(build = %key, kind = kind.segment(), %file_name, bytes = data.len(), "file stored");
        Ok(())
    }

    pub fn get_file(
        &self,
        key: &BuildKey,
        kind: ArtifactKind,
        file_name: &str,
    ) -> CatalogResult<Option<Vec<u8>>> {
        Ok(self.store.get(&paths::artifact_key(key, kind, file_name))?)
    }

    /// File names stored under one artifact kind, sorted.
    pub fn list_files(&self, key: &BuildKey, kind: ArtifactKind) -> CatalogResult<Vec<String>> {
        let prefix = paths::artifact_prefix(key, kind);
        Ok(self
            .store
            .list(&prefix)?
            .into_iter()
            .filter_map(|object_key| object_key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Copy every file of one kind between builds. Returns the number copied.
    pub fn copy_files(
        &self,
        from: &BuildKey,
        to: &BuildKey,
        kind: ArtifactKind,
    ) -> CatalogResult<usize> {
        let names = self.list_files(from, kind)?;
        for name in &names {
            self.store.copy(
                &paths::artifact_key(from, kind, name),
                &paths::artifact_key(to, kind, name),
            )?;
        }
        Ok(names.len())
    }
}

fn condition_report_key(key: &BuildKey, phase: ConditionPhase) -> String {
    let name = match phase {
        ConditionPhase::Pre => paths::PRE_CONDITION_REPORT,
        ConditionPhase::Post => paths::POST_CONDITION_REPORT,
    };
    paths::object_key(key, name)
}

/// Join a raw key listing into builds, newest first.
///
/// Each status marker instantiates a build; markers of other kinds attach to
/// an existing build id and are dropped otherwise. When an interrupted status
/// write left two status markers, the higher marker precedence wins. Nested artifact keys and
/// non-marker objects are ignored.
pub fn join_listing(center: &str, product: &str, keys: &[String]) -> Vec<Build> {
    let prefix = paths::product_prefix(center, product);
    let mut builds: BTreeMap<&str, Build> = BTreeMap::new();
    let mut attributes: Vec<(&str, Marker)> = Vec::new();

    for key in keys {
        let Some((build_id, segment)) = paths::split_build_key(&prefix, key) else {
            continue;
        };
        match Marker::parse(segment) {
            Some(Marker::Status(status)) => {
                let build = builds
                    .entry(build_id)
                    .or_insert_with(|| Build::new(BuildKey::new(center, product, build_id)));
                if status.marker_precedence() >= build.status.marker_precedence() {
                    build.status = status;
                }
            }
            Some(marker) => attributes.push((build_id, marker)),
            None => {}
        }
    }

    for (build_id, marker) in attributes {
        let Some(build) = builds.get_mut(build_id) else {
            continue;
        };
        match marker {
            Marker::Tags(tags) => build.tags = tags,
            Marker::User(user) => build.user = Some(user),
            Marker::Roles(roles) => build.roles = roles,
            Marker::Visibility(visible) => build.visible = visible,
            Marker::Deleted => build.deleted = true,
            Marker::Status(_) => {}
        }
    }

    builds.into_values().rev().collect()
}
