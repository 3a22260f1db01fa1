//! The application-supplied handler contract (§6).
//!
//! Expressed as a trait (with a blanket impl for matching `FnMut` closures,
//! matching the donor's `AsyncHandler`/`BoxAsyncHandler` pattern in
//! `runtime/http/server.rs`) so the "don't retain the client past the call"
//! rule is enforced by the borrow checker rather than documented only.

use crate::client::ClientInfo;

/// Predicate over a peer, used to restrict broadcast recipients. `Send` so a
/// filter produced by a handler running on a worker thread (§5) can be
/// posted back to the loop thread over the outcome channel.
pub type BroadcastFilter = Box<dyn Fn(&ClientInfo) -> bool + Send>;

/// Returns the default broadcast filter: every live peer is a recipient.
pub fn accept_all() -> BroadcastFilter {
    Box::new(|_| true)
}

pub trait Handler {
    /// Called once per readable event with the bytes just read.
    ///
    /// `keepalive` starts `false` (close after reply), `broadcast` starts
    /// `false`, and `filter` starts as [`accept_all`]. The handler may
    /// mutate any of them and must return the bytes to send back to the
    /// originating client.
    fn handle(
        &mut self,
        input: &[u8],
        keepalive: &mut bool,
        broadcast: &mut bool,
        client: &mut ClientInfo,
        filter: &mut BroadcastFilter,
    ) -> Vec<u8>;
}

impl<F> Handler for F
where
    F: FnMut(&[u8], &mut bool, &mut bool, &mut ClientInfo, &mut BroadcastFilter) -> Vec<u8>,
{
    fn handle(
        &mut self,
        input: &[u8],
        keepalive: &mut bool,
        broadcast: &mut bool,
        client: &mut ClientInfo,
        filter: &mut BroadcastFilter,
    ) -> Vec<u8> {
        self(input, keepalive, broadcast, client, filter)
    }
}
