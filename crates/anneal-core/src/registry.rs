//! Scheme-keyed store of declared resources.
//!
//! The registry holds exactly what providers have declared, nothing
//! derived: entity grouping and winner selection happen later in the
//! cycle. Each record keeps a monotonically increasing registration
//! sequence so recency can break version ties, and re-declaring a URL with
//! unchanged content keeps the existing record (including its sequence) so
//! identical re-registrations are complete no-ops.

use std::collections::BTreeMap;

use anneal_schema::{Digest, InstallableResource};

/// One declared revision plus registration bookkeeping.
#[derive(Debug, Clone)]
pub(crate) struct DeclaredResource {
    /// Scheme the resource was registered under.
    pub scheme: String,
    /// The declaration as handed in by the provider.
    pub resource: InstallableResource,
    /// Effective content digest, computed once at registration.
    pub digest: Digest,
    /// Registration recency, higher is newer.
    pub seq: u64,
}

/// In-memory declared-resource store, keyed by scheme then URL.
#[derive(Debug, Default)]
pub(crate) struct ResourceRegistry {
    schemes: BTreeMap<String, BTreeMap<String, DeclaredResource>>,
    next_seq: u64,
}

impl ResourceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Full-replace registration for one scheme: URLs absent from
    /// `resources` are implicitly retracted. Returns whether the declared
    /// set actually changed.
    pub(crate) fn replace(&mut self, scheme: &str, resources: Vec<InstallableResource>) -> bool {
        let incoming = self.fold_batch(scheme, resources);
        let current = self.schemes.entry(scheme.to_string()).or_default();

        let mut changed = current.len() != incoming.len();
        if !changed {
            changed = incoming
                .values()
                .any(|r| current.get(&r.resource.url).is_none_or(|c| c.digest != r.digest));
        }

        *current = incoming;
        if current.is_empty() {
            self.schemes.remove(scheme);
        }
        changed
    }

    /// Incremental registration for one scheme: upsert by URL, retract by
    /// URL. Retracting an unknown URL is a no-op. Returns whether the
    /// declared set actually changed.
    pub(crate) fn apply_delta(
        &mut self,
        scheme: &str,
        upserts: Vec<InstallableResource>,
        retracts: Vec<String>,
    ) -> bool {
        let incoming = self.fold_batch(scheme, upserts);
        let current = self.schemes.entry(scheme.to_string()).or_default();

        let mut changed = false;
        for (url, record) in incoming {
            let replaced = current.get(&url).is_none_or(|c| c.digest != record.digest);
            if replaced {
                current.insert(url, record);
                changed = true;
            }
        }
        for url in retracts {
            if current.remove(&url).is_some() {
                changed = true;
            }
        }
        if current.is_empty() {
            self.schemes.remove(scheme);
        }
        changed
    }

    /// Iterate over every declared resource across all schemes.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &DeclaredResource> {
        self.schemes.values().flat_map(BTreeMap::values)
    }

    /// Whether a URL is currently declared under the given scheme.
    pub(crate) fn contains(&self, scheme: &str, url: &str) -> bool {
        self.schemes.get(scheme).is_some_and(|m| m.contains_key(url))
    }

    /// Normalize a batch into per-URL records: invalid declarations are
    /// skipped, duplicate URLs resolve last-write-wins, and URLs whose
    /// digest is unchanged keep their existing record and sequence.
    fn fold_batch(
        &mut self,
        scheme: &str,
        resources: Vec<InstallableResource>,
    ) -> BTreeMap<String, DeclaredResource> {
        let mut batch: BTreeMap<String, DeclaredResource> = BTreeMap::new();
        for resource in resources {
            if let Err(err) = resource.validate() {
                tracing::warn!("skipping invalid resource under '{scheme}': {err}");
                continue;
            }
            let digest = resource.effective_digest();
            let url = resource.url.clone();

            if let Some(previous) = batch.get(&url) {
                if previous.digest != digest {
                    tracing::warn!(
                        "conflicting registrations for {scheme}:{url} in one batch; last write wins"
                    );
                }
            }

            let existing = self
                .schemes
                .get(scheme)
                .and_then(|m| m.get(&url))
                .filter(|c| c.digest == digest);
            let record = match existing {
                Some(current) => current.clone(),
                None => {
                    self.next_seq += 1;
                    DeclaredResource {
                        scheme: scheme.to_string(),
                        resource,
                        digest,
                        seq: self.next_seq,
                    }
                }
            };
            batch.insert(url, record);
        }
        batch
    }
}
