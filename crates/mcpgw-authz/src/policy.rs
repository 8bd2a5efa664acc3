//! Policy data model (spec §3 Policy/Subject).

use mcpgw_wire::ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Everyone,
    Role(String),
    Group(String),
    User(String),
}

impl Subject {
    fn matches(&self, user_id: &str, role: &str, groups: &[String]) -> bool {
        match self {
            Self::Everyone => true,
            Self::User(u) => u == user_id,
            Self::Role(r) => r == role,
            Self::Group(g) => groups.iter().any(|identity_group| identity_group == g),
        }
    }
}

/// Authorization rule (spec §3). A policy with zero subjects matches no
/// one, including an otherwise-everyone query — this falls naturally out
/// of `subjects.iter().any(...)` over an empty slice.
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: String,
    pub name: String,
    /// `None` means this is a global policy (applies regardless of target).
    pub target_id: Option<String>,
    pub resource_kind: ResourceKind,
    pub resource_name_regex: Option<String>,
    pub effect: Effect,
    pub priority: i64,
    pub enabled: bool,
    pub subjects: Vec<Subject>,
}

impl Policy {
    pub fn subject_matches(&self, user_id: &str, role: &str, groups: &[String]) -> bool {
        self.subjects
            .iter()
            .any(|subject| subject.matches(user_id, role, groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subjects_matches_no_one() {
        let policy = Policy {
            id: "p1".into(),
            name: "p1".into(),
            target_id: None,
            resource_kind: ResourceKind::All,
            resource_name_regex: None,
            effect: Effect::Allow,
            priority: 0,
            enabled: true,
            subjects: vec![],
        };
        assert!(!policy.subject_matches("admin", "admin", &[]));
    }

    #[test]
    fn group_subject_matches_any_member_group() {
        let everyone_denied = Subject::Group("eng".to_string());
        assert!(everyone_denied.matches("u", "r", &["eng".to_string(), "ops".to_string()]));
        assert!(!everyone_denied.matches("u", "r", &["ops".to_string()]));
    }
}
