/// Declares a UUID-backed identifier newtype with the conversions every id in
/// this crate needs: display, parsing, serde as a plain string and a sqlx
/// binding as `BINARY(16)`.
#[macro_export]
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            Ord,
            PartialOrd,
            Eq,
            PartialEq,
            Hash,
            serde::Serialize,
            serde::Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new_v4() -> Self {
                Self(uuid::Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map($name)
            }
        }
    };
}

/// Names of roles and permissions must never look like identifiers, otherwise
/// a caller that swapped an id and a name would silently hit the wrong row.
pub fn looks_like_uuid(name: &str) -> bool {
    uuid::Uuid::parse_str(name.trim()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_uuid_shaped_names() {
        assert!(looks_like_uuid("3fa85f64-5717-4562-b3fc-2c963f66afa6"));
        assert!(looks_like_uuid("3fa85f6457174562b3fc2c963f66afa6"));
        assert!(!looks_like_uuid("editor"));
        assert!(!looks_like_uuid(""));
    }
}
