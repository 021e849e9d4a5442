//! Types shared between the order-events hub (`server`) and its stream
//! consumers (`client`).

pub mod config;
pub mod types;
