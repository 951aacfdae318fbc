//! The remote authority that owns mastery state.

#[cfg(feature = "http")]
pub mod callable;

use futures::future::BoxFuture;

use crate::data_model::MasteryRecord;
use crate::error::RemoteCallError;

/// Mutations and fetches against the remote authority. Every call is scoped to one signed-in user.
///
/// `apply_review_outcome` is not idempotent on the remote side: callers must invoke it at most once
/// per outcome and rely on queue removal to avoid repeats.
pub trait ReviewRemote: Send + Sync {
    fn apply_review_outcome<'a>(
        &'a self,
        user_id: &'a str,
        item_id: &'a str,
        is_correct: bool,
    ) -> BoxFuture<'a, Result<(), RemoteCallError>>;

    /// The canonical due set. Empty, never an error, when nothing is due.
    fn get_due_review_items<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<MasteryRecord>, RemoteCallError>>;
}
