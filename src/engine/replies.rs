use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
};

use crate::domain::{
    error::InboxError,
    ids::TemplateId,
    reply::{NewReplyTemplate, ReplyKind, ReplyTemplate},
};

/// Quick replies and named templates offered to agents while composing.
#[derive(Debug)]
pub struct ReplyLibrary {
    entries: RwLock<BTreeMap<TemplateId, ReplyTemplate>>,
    last_id: AtomicU64,
    max_chars: usize,
}

impl ReplyLibrary {
    pub fn new(max_chars: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            last_id: AtomicU64::new(0),
            max_chars,
        }
    }

    /// Template names are unique ignoring case.
    pub fn add(&self, new: NewReplyTemplate) -> Result<ReplyTemplate, InboxError> {
        new.validate(self.max_chars)?;

        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        if let Some(name) = new.name.as_deref().map(str::trim) {
            let taken = entries.values().any(|existing| {
                existing
                    .name
                    .as_deref()
                    .is_some_and(|other| other.eq_ignore_ascii_case(name))
            });
            if taken {
                return Err(InboxError::validation(
                    "name",
                    format!("a template named `{name}` already exists"),
                ));
            }
        }

        let id = TemplateId(self.last_id.fetch_add(1, Ordering::AcqRel) + 1);
        let template = ReplyTemplate::from_new(id, new);
        entries.insert(id, template.clone());
        drop(entries);

        tracing::debug!(
            template_id = %id,
            kind = template.kind.as_label(),
            "reply template added"
        );
        Ok(template)
    }

    pub fn remove(&self, template_id: TemplateId) -> Result<ReplyTemplate, InboxError> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .remove(&template_id)
            .ok_or(InboxError::TemplateNotFound(template_id))
    }

    pub fn get(&self, template_id: TemplateId) -> Result<ReplyTemplate, InboxError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        entries
            .get(&template_id)
            .cloned()
            .ok_or(InboxError::TemplateNotFound(template_id))
    }

    /// Entries in creation order, optionally of one kind.
    pub fn list(&self, kind: Option<ReplyKind>) -> Result<Vec<ReplyTemplate>, InboxError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .values()
            .filter(|template| kind.map_or(true, |kind| template.kind == kind))
            .cloned()
            .collect())
    }

    /// Entries whose name or content contains `query`, ignoring case. A blank
    /// query returns everything.
    pub fn search(&self, query: &str) -> Result<Vec<ReplyTemplate>, InboxError> {
        let needle = query.trim().to_lowercase();
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .values()
            .filter(|template| needle.is_empty() || template.matches(&needle))
            .cloned()
            .collect())
    }
}

fn poisoned() -> InboxError {
    InboxError::fatal("reply library", "lock poisoned")
}
