//! LTI role claim parsing and admin eligibility.
//!
//! The launch's `roles` parameter is a comma-separated list of either bare
//! role names (`Instructor`) or full role URIs
//! (`urn:lti:role:ims/lis/TeachingAssistant`). Matching is case-insensitive
//! and tolerant of the freeform strings real LMS deployments send.

use std::collections::BTreeSet;

/// Enumerated LTI roles this gateway cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LtiRole {
    /// A student taking the course
    Learner,
    /// Course instructor
    Instructor,
    /// Teaching assistant
    TeachingAssistant,
    /// Content developer / course designer
    ContentDeveloper,
    /// Institution administrator
    Administrator,
    /// Any role token this gateway does not classify
    Other,
}

impl LtiRole {
    /// Classify a single role token.
    #[must_use]
    pub fn classify(token: &str) -> Self {
        let lowered = token.trim().to_ascii_lowercase();
        // Substring matching so URI forms like urn:lti:role:ims/lis/Instructor
        // classify the same as bare names. TeachingAssistant must be checked
        // before Instructor: the URI form nests it ("Instructor/TeachingAssistant").
        if lowered.contains("teachingassistant") {
            Self::TeachingAssistant
        } else if lowered.contains("contentdeveloper") {
            Self::ContentDeveloper
        } else if lowered.contains("instructor") {
            Self::Instructor
        } else if lowered.contains("administrator") {
            Self::Administrator
        } else if lowered.contains("learner") || lowered.contains("student") {
            Self::Learner
        } else {
            Self::Other
        }
    }

    /// Whether this role alone makes the launch eligible for admin elevation.
    #[must_use]
    pub fn admin_eligible(self) -> bool {
        matches!(
            self,
            Self::Instructor | Self::TeachingAssistant | Self::ContentDeveloper
        )
    }
}

/// The set of roles claimed by a launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet {
    roles: BTreeSet<LtiRole>,
}

impl RoleSet {
    /// Parse a comma-separated role claim string.
    #[must_use]
    pub fn parse(claim: &str) -> Self {
        let roles = claim
            .split(',')
            .filter(|token| !token.trim().is_empty())
            .map(LtiRole::classify)
            .collect();
        Self { roles }
    }

    /// True when any claimed role is admin-eligible. Eligibility alone does
    /// not grant admin; the launch must also carry an explicit admin flag.
    #[must_use]
    pub fn admin_eligible(&self) -> bool {
        self.roles.iter().any(|role| role.admin_eligible())
    }

    /// True when the set contains `role`.
    #[must_use]
    pub fn contains(&self, role: LtiRole) -> bool {
        self.roles.contains(&role)
    }
}
