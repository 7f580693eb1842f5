//! Duplicate suppression and the outstanding-work bound.

use std::collections::HashSet;

use tokio::time::Instant;
use tracing::{trace, warn};

use super::filter::{Category, Rejection};

pub const MAX_RECENT_CACHE: usize = 20;

/// Recently accepted texts. Overflow wipes the whole set rather than
/// evicting the oldest entry.
#[derive(Debug, Default)]
pub struct RecentTextCache {
    texts: HashSet<String>,
}

impl RecentTextCache {
    pub fn contains(&self, text: &str) -> bool {
        self.texts.contains(text)
    }

    pub fn insert(&mut self, text: &str) {
        self.texts.insert(text.to_string());
        if self.texts.len() > MAX_RECENT_CACHE {
            trace!("Recent text cache overflow, clearing {} entries", self.texts.len());
            self.texts.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }
}

#[derive(Debug, Default)]
pub struct AdmissionGate {
    recent: RecentTextCache,
    last_event: Option<Instant>,
    last_social: Option<Instant>,
}

impl AdmissionGate {
    /// Admit `text` unless it was narrated recently or `outstanding`
    /// (in-flight requests plus queued clips) already reached `limit`.
    pub fn try_admit(
        &mut self,
        text: &str,
        category: Category,
        outstanding: usize,
        limit: usize,
        now: Instant,
    ) -> Result<(), Rejection> {
        if self.recent.contains(text) {
            trace!("Skipping duplicate: {}", preview(text));
            return Err(Rejection::Duplicate);
        }
        if outstanding >= limit {
            warn!("Queue full ({outstanding}/{limit}), dropping event");
            return Err(Rejection::QueueFull { outstanding, limit });
        }

        self.recent.insert(text);
        self.last_event = Some(now);
        if category == Category::Social {
            self.last_social = Some(now);
        }
        Ok(())
    }

    pub fn last_event(&self) -> Option<Instant> {
        self.last_event
    }

    pub fn last_social(&self) -> Option<Instant> {
        self.last_social
    }
}

/// First 50 characters, for log lines.
pub fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
