pub mod cache;
pub mod client;
pub mod error;
pub mod executor;
pub mod retry;

pub use client::{HttpClient, JitterSource};
pub use error::HttpError;
pub use executor::{HttpMethod, HttpRequest, HttpResponse, RequestExecutor, ReqwestExecutor};
