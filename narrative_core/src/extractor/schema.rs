//! Strict schema for inference output.
//!
//! Everything the inference backend returns is untrusted: it is parsed into
//! these types and validated in full before the extractor looks at it.

use serde::{Deserialize, Serialize};

use story_graph::NodeType;

use crate::error::{NarrativeError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRelation {
    pub source: String,
    pub target: String,
    pub relation: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub weight: Option<f32>,
}

/// Top-level inference document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawExtraction {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub relations: Vec<RawRelation>,
    /// Whether the scene tests a character's core weakness.
    #[serde(default)]
    pub challenges_flaw: bool,
    /// Where the scene sits in the story structure, e.g. "midpoint".
    #[serde(default)]
    pub structural_position: Option<String>,
}

impl RawExtraction {
    /// Parse and validate inference output. Code fences around the JSON are
    /// tolerated; anything else that does not match the schema is rejected.
    pub fn parse(output: &str) -> Result<Self> {
        let body = strip_code_fence(output);
        let raw: RawExtraction = serde_json::from_str(body)
            .map_err(|e| NarrativeError::ExtractionSchema(e.to_string()))?;
        raw.validate()?;
        Ok(raw)
    }

    fn validate(&self) -> Result<()> {
        for (i, entity) in self.entities.iter().enumerate() {
            if entity.name.trim().is_empty() {
                return Err(schema_error(format!("entities[{}]: empty name", i)));
            }
            if NodeType::parse(&entity.entity_type).is_none() {
                return Err(schema_error(format!(
                    "entities[{}]: unknown type '{}'",
                    i, entity.entity_type
                )));
            }
        }
        for (i, relation) in self.relations.iter().enumerate() {
            if relation.source.trim().is_empty() || relation.target.trim().is_empty() {
                return Err(schema_error(format!("relations[{}]: empty endpoint", i)));
            }
            if relation.relation.trim().is_empty() {
                return Err(schema_error(format!("relations[{}]: empty relation", i)));
            }
            if let Some(weight) = relation.weight {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(schema_error(format!(
                        "relations[{}]: invalid weight {}",
                        i, weight
                    )));
                }
            }
        }
        Ok(())
    }
}

fn schema_error(message: String) -> NarrativeError {
    NarrativeError::ExtractionSchema(message)
}

fn strip_code_fence(output: &str) -> &str {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_document() {
        let raw = RawExtraction::parse(r#"{"entities": [{"name": "Mara", "type": "character"}]}"#)
            .unwrap();
        assert_eq!(raw.entities.len(), 1);
        assert!(raw.relations.is_empty());
        assert!(!raw.challenges_flaw);
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let raw = RawExtraction::parse("```json\n{\"challenges_flaw\": true}\n```").unwrap();
        assert!(raw.challenges_flaw);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = RawExtraction::parse(r#"{"entities": [], "mood": "grim"}"#).unwrap_err();
        assert!(matches!(err, NarrativeError::ExtractionSchema(_)));
    }

    #[test]
    fn test_invalid_documents_rejected() {
        for doc in [
            "not json",
            r#"{"entities": [{"name": " ", "type": "CHARACTER"}]}"#,
            r#"{"entities": [{"name": "Mara", "type": "SPACESHIP"}]}"#,
            r#"{"relations": [{"source": "A", "target": "B", "relation": "HINDERS", "weight": -1.0}]}"#,
            r#"{"relations": [{"source": "A", "target": "", "relation": "HINDERS"}]}"#,
        ] {
            assert!(RawExtraction::parse(doc).is_err(), "accepted: {}", doc);
        }
    }
}
