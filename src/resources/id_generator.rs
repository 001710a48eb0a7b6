//! Deterministic entity identifiers
//!
//! Scenarios need IDs that are stable across runs so that leftovers of an
//! interrupted run can be found and cleaned up, and that differ between
//! qualifier instances so that parallel runs do not collide.

use uuid::Uuid;

/// Kind of entity a scenario creates, with a code unique to that scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceType {
    pub code: u32,
    pub description: &'static str,
}

impl ResourceType {
    pub const fn new(code: u32, description: &'static str) -> Self {
        Self { code, description }
    }
}

#[derive(Debug, Clone)]
pub struct IdGenerator {
    whoami: String,
}

impl IdGenerator {
    pub fn new(whoami: impl Into<String>) -> Self {
        Self {
            whoami: whoami.into(),
        }
    }

    pub fn whoami(&self) -> &str {
        &self.whoami
    }

    /// UUID-formatted ID for `resource_type`, always ending in `000`
    pub fn make_id(&self, resource_type: ResourceType) -> String {
        let name = format!("{}/{}", self.whoami, resource_type.code);
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
            .hyphenated()
            .to_string();
        format!("{}000", &id[..id.len() - 3])
    }
}

/// `count` IDs derived from `base` by replacing its last three digits
pub fn sequential_ids(base: &str, count: usize) -> Vec<String> {
    let stem = &base[..base.len().saturating_sub(3)];
    (0..count).map(|i| format!("{}{:03}", stem, i)).collect()
}

/// ID sharing `base` except for its final character
pub fn sibling_id(base: &str, last: char) -> String {
    let mut id = base.to_string();
    id.pop();
    id.push(last);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUB: ResourceType = ResourceType::new(371, "Subscription");
    const ISA: ResourceType = ResourceType::new(373, "ISA");

    #[test]
    fn test_ids_are_stable_and_distinct() {
        let a = IdGenerator::new("uss_qualifier");
        let b = IdGenerator::new("uss_qualifier");
        let other = IdGenerator::new("someone_else");
        assert_eq!(a.make_id(SUB), b.make_id(SUB));
        assert_ne!(a.make_id(SUB), a.make_id(ISA));
        assert_ne!(a.make_id(SUB), other.make_id(SUB));
    }

    #[test]
    fn test_ids_are_uuids_ending_in_zeros() {
        let id = IdGenerator::new("uss_qualifier").make_id(ISA);
        assert!(id.ends_with("000"));
        assert_eq!(id.len(), 36);
        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_sequential_and_sibling_ids() {
        let base = IdGenerator::new("uss_qualifier").make_id(ISA);
        let ids = sequential_ids(&base, 12);
        assert_eq!(ids.len(), 12);
        assert_eq!(ids[0], base);
        assert!(ids[11].ends_with("011"));
        assert!(sibling_id(&base, '1').ends_with("001"));
    }
}
