//! Migration id generation.

use chrono::{NaiveDateTime, TimeDelta, Timelike, Utc};
use parking_lot::Mutex;

use crate::registry::ID_PREFIX_LEN;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Produces sortable migration ids.
pub trait IdGenerator: Send + Sync {
    /// A new id for the migration `name`.
    fn generate_id(&self, name: &str) -> String;

    /// The name part of an id. Values that are not ids are returned as is.
    fn get_name<'a>(&self, id: &'a str) -> &'a str;

    /// Check whether `value` has the shape of an id.
    fn is_valid_id(&self, value: &str) -> bool;
}

/// Ids of the form `yyyyMMddHHmmss_Name`, in UTC.
///
/// Ids generated by one instance are strictly increasing: when two are
/// requested within the same second, the later one is moved forward.
#[derive(Debug, Default)]
pub struct TimestampIdGenerator {
    last: Mutex<Option<NaiveDateTime>>,
}

impl TimestampIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_timestamp(&self) -> NaiveDateTime {
        let now = Utc::now().naive_utc();
        let now = now.with_nanosecond(0).unwrap_or(now);

        let mut last = self.last.lock();
        let next = match *last {
            Some(previous) if now <= previous => previous + TimeDelta::seconds(1),
            _ => now,
        };
        *last = Some(next);
        next
    }
}

impl IdGenerator for TimestampIdGenerator {
    fn generate_id(&self, name: &str) -> String {
        format!("{}_{}", self.next_timestamp().format(TIMESTAMP_FORMAT), name)
    }

    fn get_name<'a>(&self, id: &'a str) -> &'a str {
        if self.is_valid_id(id) { &id[ID_PREFIX_LEN..] } else { id }
    }

    fn is_valid_id(&self, value: &str) -> bool {
        value.len() > ID_PREFIX_LEN
            && value.as_bytes()[ID_PREFIX_LEN - 1] == b'_'
            && value.is_char_boundary(ID_PREFIX_LEN)
            && NaiveDateTime::parse_from_str(&value[..ID_PREFIX_LEN - 1], TIMESTAMP_FORMAT).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_shape() {
        let generator = TimestampIdGenerator::new();
        let id = generator.generate_id("AddNote");
        assert_eq!(id.len(), ID_PREFIX_LEN + "AddNote".len());
        assert!(generator.is_valid_id(&id));
        assert_eq!(generator.get_name(&id), "AddNote");
    }

    #[test]
    fn test_ids_strictly_increase() {
        let generator = TimestampIdGenerator::new();
        let ids: Vec<String> = (0..5).map(|_| generator.generate_id("Same")).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} >= {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_invalid_ids() {
        let generator = TimestampIdGenerator::new();
        for value in ["AddNote", "20240101120000", "20240101120000_", "2024010112000X_Name", "20241301120000_Name"] {
            assert!(!generator.is_valid_id(value), "{}", value);
        }
        assert_eq!(generator.get_name("AddNote"), "AddNote");
        assert!(generator.is_valid_id("20240101120000_AddNote"));
    }
}
