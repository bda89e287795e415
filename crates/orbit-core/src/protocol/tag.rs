//! Request-tag allocator.
//!
//! Every outbound request carries a 4-bit software-id tag that the device
//! echoes in its response; the session uses the tag to find the in-flight
//! request the response belongs to.  Tag 0 is reserved: the device stamps
//! unsolicited notifications with it, so handing 0 to a request would make
//! notifications indistinguishable from responses.
//!
//! The allocator is a lock-free atomic counter cycling `1..=15`, so at most
//! fifteen requests can be outstanding at once – far more than the device
//! will ever accept anyway.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::protocol::frame::NOTIFICATION_SW_ID;

/// Highest tag value; the nibble wraps back to 1 after this.
pub const MAX_TAG: u8 = 0x0F;

/// Cycling allocator for request tags.
///
/// `Ordering::Relaxed` is sufficient: tags only need to be distinct between
/// concurrent callers, not to synchronize any other memory.
#[derive(Debug)]
pub struct TagAllocator {
    next: AtomicU8,
}

impl TagAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU8::new(1) }
    }

    /// Returns the next tag in `1..=15`, never [`NOTIFICATION_SW_ID`].
    pub fn next(&self) -> u8 {
        let tag = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
                Some(if t >= MAX_TAG { 1 } else { t + 1 })
            })
            .unwrap_or(1);
        debug_assert_ne!(tag, NOTIFICATION_SW_ID);
        tag
    }
}

impl Default for TagAllocator {
    fn default() -> Self {
        Self::new()
    }
}
