//! Interfaces the HTTP layer exposes to a transaction.

use bytes::Bytes;

/// Write side of an executing request.
///
/// All methods are fire-and-forget from the transaction's point of view;
/// delivery failures surface back through `Transaction::fail`.
pub trait Executor: Send + Sync {
    /// Write one request body part to the connection.
    fn write_request_body_part(&self, part: Bytes);
    /// Signal end of the request body stream.
    fn finish_request_body_stream(&self);
    /// Abort the request on the connection. Called at most once per
    /// transaction.
    fn cancel_request(&self);
    /// Ask the connection for more response body bytes.
    fn demand_response_body_stream(&self);
}

/// Scheduler holding a not-yet-executing request.
pub trait Scheduler: Send + Sync {
    /// Remove the request from the queue.
    fn cancel_request(&self);
}
