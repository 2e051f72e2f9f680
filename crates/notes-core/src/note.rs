//! Notes and the locally cached note set.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    /// Server-assigned identifier
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Arrival-ordered collection of notes, unique by id.
///
/// Every note in the set belongs to the same owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteSet {
    notes: Vec<Note>,
}

impl NoteSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a full listing, keeping the server order.
    ///
    /// Notes owned by someone else and repeated ids are dropped.
    pub fn from_listing(owner_id: &str, listing: Vec<Note>) -> Self {
        let mut seen = HashSet::with_capacity(listing.len());
        let mut notes = Vec::with_capacity(listing.len());
        for note in listing {
            if note.owner_id != owner_id {
                warn!(note_id = %note.id, "Dropping note owned by another user from listing");
                continue;
            }
            if !seen.insert(note.id.clone()) {
                warn!(note_id = %note.id, "Dropping duplicate note id from listing");
                continue;
            }
            notes.push(note);
        }
        Self { notes }
    }

    pub fn get(&self, id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Remove the note with `id`. Ids are unique, so at most one entry goes.
    pub fn remove(&mut self, id: &str) -> Option<Note> {
        let pos = self.notes.iter().position(|n| n.id == id)?;
        Some(self.notes.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter()
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Note> {
        self.notes.clone()
    }
}
