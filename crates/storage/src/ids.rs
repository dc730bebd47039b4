use std::fmt;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, StorageError, StorageResult};

// Macro keeps all ID wrappers structurally identical, so future migrations stay predictable.
macro_rules! define_storage_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(raw: Uuid) -> Self {
                Self(raw)
            }

            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn parse(raw: &str) -> StorageResult<Self> {
                let parsed = Uuid::parse_str(raw).context(InvalidIdSnafu {
                    stage: "parse-storage-id",
                    id_type: $id_type,
                    raw: raw.to_string(),
                })?;
                Ok(Self(parsed))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(formatter, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(raw: &str) -> StorageResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_storage_id!(ChatId, "chat-id");
define_storage_id!(MessageId, "message-id");
define_storage_id!(UserId, "user-id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_text_roundtrip_is_lossless() {
        let chat_id = ChatId::new_v7();
        let reparsed = ChatId::parse(&chat_id.to_string()).expect("well-formed id must parse");
        assert_eq!(chat_id, reparsed);
    }

    #[test]
    fn malformed_id_is_rejected() {
        let parsed = "definitely-not-a-uuid".parse::<MessageId>();
        assert!(matches!(parsed, Err(StorageError::InvalidId { .. })));
    }

    #[test]
    fn v7_ids_are_time_ordered() {
        // Listing queries tie-break on id, which only works because v7 ids
        // generated later compare greater.
        let first = MessageId::new_v7();
        let second = MessageId::new_v7();
        assert!(second > first);
        assert!(second.to_string() > first.to_string());
    }
}
