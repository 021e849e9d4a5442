pub mod channel;
pub mod frame;
pub mod json_error;
pub mod order;
pub mod server_config;
pub mod sse;

pub use self::channel::{ADMIN_CHANNEL, user_channel};
pub use self::frame::{SseDecoder, encode_comment};
pub use self::json_error::ErrorResponse;
pub use self::order::{OrderCreated, OrderStatus, OrderStatusUpdate, to_data};
pub use self::sse::{EventEnvelope, EventType, SseError, SseResult};
