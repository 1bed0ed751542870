mod http;

pub use http::HttpDispatcher;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::GatewayError;
use crate::request::Request;

/// Drives one request through to a response written on its sink.
///
/// `async fn` in a trait would make `Dispatcher` non-object-safe; the
/// connection protocol machine holds dispatchers behind `Arc<dyn Dispatcher>`,
/// so the future is boxed by hand instead.
///
/// On success the returned `Bytes` is unused payload (kept for symmetry with
/// the original design's `handle_task_ok`); the response itself has already
/// been streamed to `request.sink()`. On failure, the protocol machine writes
/// the matching error response — the dispatcher must not have written
/// anything to the sink in that case, or the writer-exclusivity invariant
/// described in `proto::sink` is violated.
pub trait Dispatcher: Send + Sync {
    fn dispatch<'a>(
        &'a self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, GatewayError>> + Send + 'a>>;
}
