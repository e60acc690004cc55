use warelay_core::MessageStatus;

/// Map a provider status callback (`status.groupName` / `status.name`) onto
/// the stored lifecycle. Unknown combinations yield `None` and the update
/// is dropped with a log line.
pub fn normalize(group_name: &str, name: &str) -> Option<MessageStatus> {
    match group_name {
        "PENDING" => Some(MessageStatus::Pending),
        "EXPIRED" | "REJECTED" | "UNDELIVERABLE" => Some(MessageStatus::Failed),
        "DELIVERED" => match name {
            "DELIVERED_TO_OPERATOR" => Some(MessageStatus::Sent),
            "DELIVERED_TO_HANDSET" => Some(MessageStatus::Delivered),
            _ => None,
        },
        "SEEN" => Some(MessageStatus::Read),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_table() {
        assert_eq!(
            normalize("PENDING", "PENDING_ENROUTE"),
            Some(MessageStatus::Pending)
        );
        assert_eq!(
            normalize("EXPIRED", "EXPIRED_EXPIRED"),
            Some(MessageStatus::Failed)
        );
        assert_eq!(
            normalize("REJECTED", "REJECTED_PREFIX_MISSING"),
            Some(MessageStatus::Failed)
        );
        assert_eq!(
            normalize("UNDELIVERABLE", "UNDELIVERABLE_REJECTED_OPERATOR"),
            Some(MessageStatus::Failed)
        );
        assert_eq!(
            normalize("DELIVERED", "DELIVERED_TO_OPERATOR"),
            Some(MessageStatus::Sent)
        );
        assert_eq!(
            normalize("DELIVERED", "DELIVERED_TO_HANDSET"),
            Some(MessageStatus::Delivered)
        );
        assert_eq!(normalize("SEEN", "SEEN"), Some(MessageStatus::Read));
    }

    #[test]
    fn test_unknown_status_is_dropped() {
        assert_eq!(normalize("DELETED", "MESSAGE_DELETED"), None);
        assert_eq!(normalize("DELIVERED", "SOMETHING_NEW"), None);
    }
}
