//! Strongly-typed identifiers for domain entities.
//!
//! Identifiers are database primary keys. They are ordered, so "ordered by
//! id" is the same as "ordered by insertion".

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            JsonSchema,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn value(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let raw = s
                    .strip_prefix(concat!($prefix, "#"))
                    .or_else(|| s.strip_prefix('#'))
                    .unwrap_or(s);
                Ok(Self(raw.parse()?))
            }
        }
    };
}

define_id!(PipelineId, "pipeline");
define_id!(BuildId, "build");
define_id!(ProjectId, "project");
define_id!(RunnerId, "runner");

/// Extract the raw primary keys of a slice of ids, for binding into queries.
pub fn raw_ids<T: Copy + Into<i64>>(ids: &[T]) -> Vec<i64> {
    ids.iter().map(|id| (*id).into()).collect()
}

impl From<PipelineId> for i64 {
    fn from(id: PipelineId) -> Self {
        id.0
    }
}

impl From<BuildId> for i64 {
    fn from(id: BuildId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_id_display() {
        let id = PipelineId::new(42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn test_pipeline_id_parse() {
        let parsed: PipelineId = "pipeline#42".parse().unwrap();
        assert_eq!(parsed, PipelineId::new(42));

        let short: PipelineId = "#7".parse().unwrap();
        assert_eq!(short.value(), 7);

        assert!("pipeline#abc".parse::<PipelineId>().is_err());
    }

    #[test]
    fn test_ids_order_by_value() {
        let mut ids = vec![BuildId::new(3), BuildId::new(1), BuildId::new(2)];
        ids.sort();
        assert_eq!(raw_ids(&ids), vec![1, 2, 3]);
    }
}
