//! Per-editor registry of remote participants and their carets.
//!
//! Tracks who is looking at a document, where their cursor sits, and when
//! they were last seen. Position adjustment against concurrent edits lives
//! in [`crate::transform::transform_cursor`].

use std::collections::HashMap;

use crate::id::unix_millis;
use crate::operation::{Cursor, Operation, RemoteUser, Selection};
use crate::transform::transform_cursor;

#[derive(Debug, Default)]
pub struct CursorTracker {
    users: HashMap<String, RemoteUser>,
}

impl CursorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a user entry.
    pub fn add_user(&mut self, user: RemoteUser) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn remove_user(&mut self, user_id: &str) -> Option<RemoteUser> {
        self.users.remove(user_id)
    }

    /// Update a known user's caret, refreshing `last_seen`. Returns whether
    /// the user was present.
    pub fn update_cursor(
        &mut self,
        user_id: &str,
        cursor: Option<Cursor>,
        selection: Option<Selection>,
    ) -> bool {
        match self.users.get_mut(user_id) {
            Some(user) => {
                user.cursor = cursor;
                user.selection = selection;
                user.last_seen = unix_millis();
                user.is_active = true;
                true
            }
            None => false,
        }
    }

    /// Shift every tracked caret to account for an applied operation.
    pub fn transform_all(&mut self, op: &Operation) {
        for user in self.users.values_mut() {
            if let Some(cursor) = user.cursor {
                user.cursor = Some(transform_cursor(cursor, op));
            }
            if let Some(selection) = user.selection {
                user.selection = Some(Selection::new(
                    transform_cursor(selection.start, op),
                    transform_cursor(selection.end, op),
                ));
            }
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&RemoteUser> {
        self.users.get(user_id)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn users(&self) -> Vec<RemoteUser> {
        self.users.values().cloned().collect()
    }

    /// Users currently marked active.
    pub fn active_users(&self) -> Vec<RemoteUser> {
        self.users
            .values()
            .filter(|u| u.is_active)
            .cloned()
            .collect()
    }

    pub fn mark_inactive(&mut self, user_id: &str) {
        if let Some(user) = self.users.get_mut(user_id) {
            user.is_active = false;
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
