//! The narrative relation vocabulary.

use serde::{Deserialize, Serialize};

/// Directed narrative relation types.
///
/// The set is closed; extraction output that names something else is carried
/// in [`RelationType::Custom`] so consumers can still match exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Motivates,
    Hinders,
    Causes,
    /// A scene tests a character's core weakness.
    Challenges,
    Knows,
    /// Forward reference from a scene to a later event.
    Foreshadows,
    /// Backward reference from a scene to an earlier event.
    Callbacks,
    LocatedIn,
    Owns,
    PartOf,
    Loves,
    Hates,
    /// Experimental. Always routed to the conflict queue on extraction.
    Contradicts,
    /// Free-text label outside the vocabulary.
    Custom(String),
}

/// Grouping of relation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationFamily {
    GoalCausal,
    CharacterTesting,
    Epistemic,
    Threading,
    Structural,
    Affect,
    Experimental,
    Custom,
}

impl RelationType {
    /// Every named member of the vocabulary.
    pub const ALL: [RelationType; 13] = [
        RelationType::Motivates,
        RelationType::Hinders,
        RelationType::Causes,
        RelationType::Challenges,
        RelationType::Knows,
        RelationType::Foreshadows,
        RelationType::Callbacks,
        RelationType::LocatedIn,
        RelationType::Owns,
        RelationType::PartOf,
        RelationType::Loves,
        RelationType::Hates,
        RelationType::Contradicts,
    ];

    /// Canonical label. Custom relations return their own label.
    pub fn as_str(&self) -> &str {
        match self {
            RelationType::Motivates => "MOTIVATES",
            RelationType::Hinders => "HINDERS",
            RelationType::Causes => "CAUSES",
            RelationType::Challenges => "CHALLENGES",
            RelationType::Knows => "KNOWS",
            RelationType::Foreshadows => "FORESHADOWS",
            RelationType::Callbacks => "CALLBACKS",
            RelationType::LocatedIn => "LOCATED_IN",
            RelationType::Owns => "OWNS",
            RelationType::PartOf => "PART_OF",
            RelationType::Loves => "LOVES",
            RelationType::Hates => "HATES",
            RelationType::Contradicts => "CONTRADICTS",
            RelationType::Custom(label) => label,
        }
    }

    /// Parse a label, tolerating case, spaces and hyphens. Anything outside the
    /// vocabulary becomes `Custom` with the trimmed original label.
    pub fn parse(label: &str) -> Self {
        let canonical = label.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        RelationType::ALL
            .into_iter()
            .find(|r| r.as_str() == canonical)
            .unwrap_or_else(|| RelationType::Custom(label.trim().to_string()))
    }

    pub fn family(&self) -> RelationFamily {
        match self {
            RelationType::Motivates | RelationType::Hinders | RelationType::Causes => {
                RelationFamily::GoalCausal
            }
            RelationType::Challenges => RelationFamily::CharacterTesting,
            RelationType::Knows => RelationFamily::Epistemic,
            RelationType::Foreshadows | RelationType::Callbacks => RelationFamily::Threading,
            RelationType::LocatedIn | RelationType::Owns | RelationType::PartOf => {
                RelationFamily::Structural
            }
            RelationType::Loves | RelationType::Hates => RelationFamily::Affect,
            RelationType::Contradicts => RelationFamily::Experimental,
            RelationType::Custom(_) => RelationFamily::Custom,
        }
    }

    /// Whether extraction accepts this type when no override is configured.
    pub fn default_enabled(&self) -> bool {
        !matches!(self, RelationType::Contradicts | RelationType::Custom(_))
    }

    /// Experimental types are always flagged and never merged silently.
    pub fn is_experimental(&self) -> bool {
        matches!(self, RelationType::Contradicts)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, RelationType::Custom(_))
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_labels() {
        assert_eq!(RelationType::parse("hinders"), RelationType::Hinders);
        assert_eq!(RelationType::parse("located in"), RelationType::LocatedIn);
        assert_eq!(RelationType::parse("PART-OF"), RelationType::PartOf);
    }

    #[test]
    fn test_parse_unknown_becomes_custom() {
        let relation = RelationType::parse(" mentors ");
        assert_eq!(relation, RelationType::Custom("mentors".to_string()));
        assert_eq!(relation.as_str(), "mentors");
        assert_eq!(relation.family(), RelationFamily::Custom);
    }

    #[test]
    fn test_default_flags() {
        assert!(RelationType::Hinders.default_enabled());
        assert!(!RelationType::Contradicts.default_enabled());
        assert!(RelationType::Contradicts.is_experimental());
        assert!(!RelationType::Custom("x".into()).default_enabled());
    }

    #[test]
    fn test_vocabulary_round_trips_through_labels() {
        for relation in RelationType::ALL {
            assert_eq!(RelationType::parse(relation.as_str()), relation);
        }
    }
}
