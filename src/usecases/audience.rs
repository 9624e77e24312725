use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};

use crate::{
    domain::{
        audience::{AudienceSegment, CustomerProfile, SegmentWindows},
        error::InboxError,
        ids::CustomerId,
    },
    engine::{blocklist::ContactBlocklist, clock::Clock},
    usecases::contracts::{CustomerDirectory, DirectorySourceError},
};

/// Evaluates audience segments against the customer directory. Read-only.
#[derive(Clone)]
pub struct AudienceResolver {
    directory: Arc<dyn CustomerDirectory>,
    blocklist: Option<ContactBlocklist>,
    windows: SegmentWindows,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AudienceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudienceResolver")
            .field("windows", &self.windows)
            .finish_non_exhaustive()
    }
}

impl AudienceResolver {
    pub fn new(
        directory: Arc<dyn CustomerDirectory>,
        windows: SegmentWindows,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            blocklist: None,
            windows,
            clock,
        }
    }

    /// Blocked customers are left out of every segment.
    pub fn with_blocklist(mut self, blocklist: ContactBlocklist) -> Self {
        self.blocklist = Some(blocklist);
        self
    }

    pub fn resolve(&self, segment: AudienceSegment) -> Result<BTreeSet<CustomerId>, InboxError> {
        Ok(self
            .resolve_at(segment, self.clock.now())?
            .into_iter()
            .map(|profile| profile.id)
            .collect())
    }

    /// Recipients with the profile data a send needs, ordered by id.
    pub fn resolve_profiles(
        &self,
        segment: AudienceSegment,
    ) -> Result<Vec<CustomerProfile>, InboxError> {
        self.resolve_at(segment, self.clock.now())
    }

    pub fn estimate_reach(&self, segment: AudienceSegment) -> Result<usize, InboxError> {
        let reach = self.resolve(segment)?.len();
        tracing::debug!(segment = segment.as_label(), reach, "audience reach estimated");
        Ok(reach)
    }

    /// Deterministic for a fixed directory snapshot, blocklist and `now`.
    /// Duplicate records of one customer are merged, and any opted-out record
    /// excludes the customer.
    pub fn resolve_at(
        &self,
        segment: AudienceSegment,
        now: DateTime<Utc>,
    ) -> Result<Vec<CustomerProfile>, InboxError> {
        let records = self.directory.customers().map_err(map_source_error)?;
        let blocked = match &self.blocklist {
            Some(blocklist) => blocklist.blocked_ids()?,
            None => BTreeSet::new(),
        };

        let mut merged: BTreeMap<CustomerId, CustomerProfile> = BTreeMap::new();
        for record in records {
            match merged.get_mut(&record.id) {
                Some(existing) => merge_profile(existing, record),
                None => {
                    merged.insert(record.id.clone(), record);
                }
            }
        }

        Ok(merged
            .into_values()
            .filter(|profile| !profile.opted_out && !blocked.contains(&profile.id))
            .filter(|profile| self.windows.matches(segment, profile, now))
            .collect())
    }
}

fn merge_profile(existing: &mut CustomerProfile, duplicate: CustomerProfile) {
    existing.opted_out |= duplicate.opted_out;
    existing.created_at = existing.created_at.min(duplicate.created_at);
    existing.last_active_at = existing.last_active_at.max(duplicate.last_active_at);
    if existing.display_name.trim().is_empty() {
        existing.display_name = duplicate.display_name;
    }
}

fn map_source_error(error: DirectorySourceError) -> InboxError {
    match error {
        DirectorySourceError::Unavailable(reason) => {
            tracing::warn!(
                code = "INBOX_DIRECTORY_UNAVAILABLE",
                reason = %reason,
                "customer directory read failed"
            );
            InboxError::DirectoryUnavailable(reason)
        }
        DirectorySourceError::InvalidData(reason) => InboxError::fatal("customer directory", reason),
    }
}
