use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    /// Not the admin. The caller must drop the request without replying.
    Ignored,
}

/// Guard called at the top of every privileged handler.
pub fn authorize(admin_id: i64, sender_id: i64) -> Authorization {
    if admin_id != 0 && sender_id == admin_id {
        Authorization::Authorized
    } else {
        debug!(sender_id, "Ignoring request from unauthorized sender.");
        Authorization::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_admin_is_authorized() {
        assert_eq!(authorize(42, 42), Authorization::Authorized);
        assert_eq!(authorize(42, 43), Authorization::Ignored);
        assert_eq!(authorize(42, -42), Authorization::Ignored);
    }

    #[test]
    fn test_unset_admin_authorizes_nobody() {
        assert_eq!(authorize(0, 0), Authorization::Ignored);
        assert_eq!(authorize(0, 1), Authorization::Ignored);
    }
}
