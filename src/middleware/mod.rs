//! Request lifecycle instrumentation.

pub mod capture;
pub mod context;
pub mod instrument;
pub mod request_id;

pub use capture::{BodyContent, CapturedBody};
pub use context::RequestContext;
pub use instrument::{classify, request_logger_middleware, RequestLogger, X_RESPONSE_TIME};
pub use request_id::{IdGenerator, RequestId, X_REQUEST_ID};
