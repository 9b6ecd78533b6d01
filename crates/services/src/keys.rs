//! Cache key layout.
//!
//! Every view cached for a `(user, formation)` pair lives under
//! `progress:{user}:{formation}:`, so a single prefix invalidation drops all
//! of them. The trailing `:` keeps user 1 from matching user 12.

use lms_core::model::{FormationId, UserId};

#[must_use]
pub fn scope_prefix(user_id: UserId, formation_id: FormationId) -> String {
    format!("progress:{user_id}:{formation_id}:")
}

#[must_use]
pub fn formation_view_key(user_id: UserId, formation_id: FormationId) -> String {
    format!("{}view", scope_prefix(user_id, formation_id))
}
