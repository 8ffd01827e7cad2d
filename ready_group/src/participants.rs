// Copyright © 2026 The Ready Group Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::hash_map::{self, HashMap};

/// Opaque identity of a participant.
pub type ParticipantId = u64;

/// Readiness of every registered participant of a group.
///
/// This is the view handed to validators. It is only ever borrowed while the
/// group holds its participant lock for reading.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Participants {
    states: HashMap<ParticipantId, bool>,
}

impl Participants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`, overwriting any previous readiness. Returns the
    /// previous readiness if `id` was already registered.
    pub fn insert(&mut self, id: ParticipantId, ready: bool) -> Option<bool> {
        self.states.insert(id, ready)
    }

    /// Update the readiness of an already registered participant. Unknown
    /// ids are left alone and `false` is returned.
    pub fn update(&mut self, id: ParticipantId, ready: bool) -> bool {
        match self.states.get_mut(&id) {
            Some(state) => {
                *state = ready;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.states.contains_key(&id)
    }

    /// Readiness of `id`, or `None` if it is not registered.
    pub fn is_ready(&self, id: ParticipantId) -> Option<bool> {
        self.states.get(&id).copied()
    }

    /// True iff every registered participant is ready. An empty set is
    /// considered ready.
    pub fn all_ready(&self) -> bool {
        self.states.values().all(|ready| *ready)
    }

    pub fn ready_count(&self) -> usize {
        self.states.values().filter(|ready| **ready).count()
    }

    /// Ids of the participants which are not ready yet.
    pub fn pending(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.states
            .iter()
            .filter(|(_, ready)| !**ready)
            .map(|(id, _)| *id)
    }

    pub fn iter(&self) -> hash_map::Iter<'_, ParticipantId, bool> {
        self.states.iter()
    }

    /// Independent copy of the current states.
    pub fn to_map(&self) -> HashMap<ParticipantId, bool> {
        self.states.clone()
    }
}

impl<'a> IntoIterator for &'a Participants {
    type Item = (&'a ParticipantId, &'a bool);
    type IntoIter = hash_map::Iter<'a, ParticipantId, bool>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<(ParticipantId, bool)> for Participants {
    fn from_iter<I: IntoIterator<Item = (ParticipantId, bool)>>(iter: I) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}
