//! Network transfer of pack data.

pub mod engine;
pub mod http;

pub use engine::{TransferEngine, TransferOutcome, TransferRequest};
pub use http::{
    range_header, BoxFuture, ByteStream, HttpTransport, ReqwestTransport, TransportError,
    TransportResponse,
};
