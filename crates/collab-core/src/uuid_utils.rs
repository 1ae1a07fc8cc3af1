//! UUID helpers.

use uuid::Uuid;

/// Generate a new time-ordered UUIDv7 identifier.
///
/// ```
/// use collab_core::uuid_utils::new_v7;
///
/// let first = new_v7();
/// let second = new_v7();
/// assert_ne!(first, second);
/// ```
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}
