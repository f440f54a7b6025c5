//! De-duplication, ordering and truncation of occurrences.

use std::collections::HashSet;
use std::str::FromStr;

use crate::occurrence::Occurrence;

/// Occurrence order in the rendered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sort {
    #[default]
    Ascending,
    Descending,
    /// Keep expansion order
    Unsorted,
}

impl FromStr for Sort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Sort::Ascending),
            "desc" | "descending" => Ok(Sort::Descending),
            "off" | "none" | "unsorted" => Ok(Sort::Unsorted),
            other => Err(format!("unknown sort order: {other}")),
        }
    }
}

/// Occurrences already emitted during one top-level render.
///
/// A page may embed the same feed several times; each `(uid, recurrence id)`
/// is only rendered (or exported) once per session.
#[derive(Debug, Default)]
pub struct RenderSession {
    seen: HashSet<(String, Option<String>)>,
}

impl RenderSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }

    /// Record `key`; returns `false` when it was already recorded.
    pub fn first_sighting(&mut self, key: (String, Option<String>)) -> bool {
        self.seen.insert(key)
    }

    pub fn has_seen(&self, uid: &str, recurrence_id: Option<&str>) -> bool {
        self.seen
            .contains(&(uid.to_string(), recurrence_id.map(str::to_string)))
    }
}

/// Drop occurrences already seen in `session` (or repeated in the input),
/// order them, then keep at most `max_count` (negative means unlimited).
/// Only the occurrences returned are recorded in the session.
pub fn select<'a>(
    occurrences: Vec<Occurrence<'a>>,
    sort: Sort,
    max_count: i64,
    session: &mut RenderSession,
) -> Vec<Occurrence<'a>> {
    let mut batch = HashSet::new();
    let mut selected: Vec<Occurrence<'a>> = occurrences
        .into_iter()
        .filter(|occ| {
            let key = occ.key();
            !session.seen.contains(&key) && batch.insert(key)
        })
        .collect();

    match sort {
        Sort::Ascending => selected.sort_by_key(|occ| occ.start),
        Sort::Descending => selected.sort_by(|a, b| b.start.cmp(&a.start)),
        Sort::Unsorted => {}
    }

    if let Ok(limit) = usize::try_from(max_count) {
        selected.truncate(limit);
    }

    for occ in &selected {
        session.first_sighting(occ.key());
    }

    selected
}
