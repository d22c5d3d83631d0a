//! I/O: the transport abstraction, progress-reporting streams, the execution
//! engine and the client entry points.

mod client;
mod engine;
pub mod progress;
mod transport;

pub use client::{Client, PendingRequest};
pub use engine::run;
pub use progress::{DownloadProgress, UploadProgress, stream_response, upload_percent};
pub use transport::{FnTransport, Transport, from_fn};

#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
