pub mod http;
pub mod orders;
pub mod sse;
pub mod status;
