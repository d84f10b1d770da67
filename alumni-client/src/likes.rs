use std::collections::HashMap;

use alumni_types::*;

use crate::error::{ThreadError, ThreadResult};
use crate::optimistic::{Optimistic, Phase};

type LikeKey = (LikeableType, i64);

/// Proof that a toggle was applied locally; hand it back to settle the toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeTicket {
    pub likeable_type: LikeableType,
    pub likeable_id: i64,
    pub previous: LikeStatus,
    pub next: LikeStatus,
}

/// Flip `is_liked` and move the count by one, never below zero.
pub fn toggled(status: LikeStatus) -> LikeStatus {
    if status.is_liked {
        LikeStatus {
            like_count: (status.like_count - 1).max(0),
            is_liked: false,
        }
    } else {
        LikeStatus {
            like_count: status.like_count + 1,
            is_liked: true,
        }
    }
}

#[derive(Debug)]
struct LikeEntry {
    state: Optimistic<LikeStatus>,
    /// Last value the server reported
    server: LikeStatus,
}

/// Optimistic like state for every item on screen.
#[derive(Debug, Default)]
pub struct LikeRegistry {
    entries: HashMap<LikeKey, LikeEntry>,
}

impl LikeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take like state embedded in fetched comments or replies.
    ///
    /// A value equal to the last one seen is a cached copy and leaves a
    /// committed toggle alone. Returns false when nothing changed, including
    /// while a toggle of that item is in flight.
    pub fn seed(&mut self, likeable_type: LikeableType, likeable_id: i64, status: LikeStatus) -> bool {
        match self.entries.get_mut(&(likeable_type, likeable_id)) {
            Some(entry) if entry.server == status => false,
            Some(entry) => {
                let applied = entry.state.reset(status);
                if applied {
                    entry.server = status;
                }
                applied
            }
            None => {
                self.insert(likeable_type, likeable_id, status);
                true
            }
        }
    }

    /// Overwrite with an authoritative like-status read, unless a toggle is in flight.
    pub fn reconcile(&mut self, likeable_type: LikeableType, likeable_id: i64, status: LikeStatus) -> bool {
        match self.entries.get_mut(&(likeable_type, likeable_id)) {
            Some(entry) => {
                let applied = entry.state.reset(status);
                if applied {
                    entry.server = status;
                }
                applied
            }
            None => {
                self.insert(likeable_type, likeable_id, status);
                true
            }
        }
    }

    /// Entry for the item, created with `status` if it is not tracked yet.
    fn insert(&mut self, likeable_type: LikeableType, likeable_id: i64, status: LikeStatus) -> &mut LikeEntry {
        self.entries
            .entry((likeable_type, likeable_id))
            .or_insert_with(|| LikeEntry {
                state: Optimistic::new(status),
                server: status,
            })
    }

    pub fn contains(&self, likeable_type: LikeableType, likeable_id: i64) -> bool {
        self.entries.contains_key(&(likeable_type, likeable_id))
    }

    pub fn status(&self, likeable_type: LikeableType, likeable_id: i64) -> Option<LikeStatus> {
        self.entries
            .get(&(likeable_type, likeable_id))
            .map(|entry| *entry.state.value())
    }

    pub fn phase(&self, likeable_type: LikeableType, likeable_id: i64) -> Phase {
        self.entries
            .get(&(likeable_type, likeable_id))
            .map(|entry| entry.state.phase())
            .unwrap_or_default()
    }

    /// Apply a toggle locally. Anonymous users and items with a toggle
    /// already in flight are refused without touching any state.
    pub fn begin_toggle(
        &mut self,
        ctx: &UserContext,
        likeable_type: LikeableType,
        likeable_id: i64,
    ) -> ThreadResult<LikeTicket> {
        if !ctx.is_authenticated() {
            return Err(ThreadError::LoginRequired("like"));
        }

        let entry = self.insert(
            likeable_type,
            likeable_id,
            LikeStatus {
                like_count: 0,
                is_liked: false,
            },
        );

        let previous = *entry.state.value();
        let next = toggled(previous);
        entry
            .state
            .begin(next)
            .map_err(|_| ThreadError::InFlight("like"))?;

        Ok(LikeTicket {
            likeable_type,
            likeable_id,
            previous,
            next,
        })
    }

    /// Settle a toggle: keep the optimistic value, or restore the exact
    /// pre-toggle value.
    pub fn finish(&mut self, ticket: &LikeTicket, accepted: bool) {
        let Some(entry) = self.entries.get_mut(&(ticket.likeable_type, ticket.likeable_id)) else {
            return;
        };
        if accepted {
            entry.state.commit();
        } else {
            entry.state.rollback();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
