/// Shared channel every admin dashboard subscribes to.
pub const ADMIN_CHANNEL: &str = "admin-orders";

/// Private channel of a single buyer: `user-{userId}`.
pub fn user_channel(user_id: &str) -> String {
    format!("user-{}", user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_channel_naming() {
        assert_eq!(user_channel("42"), "user-42");
        assert_ne!(user_channel("admin"), ADMIN_CHANNEL);
    }
}
