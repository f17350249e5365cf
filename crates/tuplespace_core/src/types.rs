//! Core identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            /// Creates an id from its raw value.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw id value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for a transaction.
    ///
    /// Transaction IDs are monotonically increasing and never reused.
    TransactionId,
    "txn"
);

id_type!(
    /// Unique identifier for a sub-transaction.
    SubTransactionId,
    "stx"
);

id_type!(
    /// Identifier for a container, stable across restarts.
    ContainerId,
    "cnt"
);

id_type!(
    /// Identifier for an entry, stable across restarts.
    ///
    /// Entry ids grow with write order.
    EntryId,
    "ent"
);

id_type!(
    /// Identifier for a submitted request.
    TaskId,
    "task"
);

id_type!(
    /// Identifier for a registered aspect.
    AspectId,
    "asp"
);

/// A container reference: the owning space plus the container id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerRef {
    /// Id of the owning space.
    pub space: uuid::Uuid,
    /// Container id within that space.
    pub id: ContainerId,
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        assert!(t1 < t2);
    }

    #[test]
    fn id_display() {
        assert_eq!(TransactionId::new(3).to_string(), "txn:3");
        assert_eq!(SubTransactionId::new(4).to_string(), "stx:4");
        assert_eq!(ContainerId::new(42).to_string(), "cnt:42");
        assert_eq!(EntryId::new(9).as_u64(), 9);
    }

    #[test]
    fn container_ref_display() {
        let space = uuid::Uuid::nil();
        let r = ContainerRef {
            space,
            id: ContainerId::new(1),
        };
        assert_eq!(
            r.to_string(),
            "cnt:1@00000000-0000-0000-0000-000000000000"
        );
    }
}
