//! # Question suggestions
//!
//! Proposes questions a user could ask about the connected database, based on
//! its live structure. Shown as starting points for a new conversation.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    discovery::SchemaDiscovery,
    error::{DbaiError, Result},
    llm::{LanguageModel, ObjectSchema},
};

pub const SUGGESTION_COUNT: usize = 5;

const SUGGESTION_SYSTEM_PROMPT: &str = "You help users explore a relational database by proposing questions they could ask about its data.";

#[derive(Debug, Deserialize)]
struct GeneratedSuggestions {
    suggestions: Vec<String>,
}

pub struct SuggestionGenerator {
    model: Arc<dyn LanguageModel>,
    discovery: Arc<SchemaDiscovery>,
}

impl SuggestionGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, discovery: Arc<SchemaDiscovery>) -> Self {
        Self { model, discovery }
    }

    /// Up to [`SUGGESTION_COUNT`] natural-language questions.
    pub async fn suggest(&self) -> Result<Vec<String>> {
        let rows = self.discovery.discover().await?;
        let structure =
            serde_json::to_string(&rows).map_err(|err| DbaiError::Snapshot(err.to_string()))?;

        let prompt = format!(
            "Database structure: {structure}\n\
             Suggest {SUGGESTION_COUNT} questions a user could ask about the data in this database. \
             Each question must be answerable with a single SQL query."
        );

        let object = self
            .model
            .generate_object(
                SUGGESTION_SYSTEM_PROMPT,
                &prompt,
                ObjectSchema::new(
                    "suggestions",
                    json!({
                        "type": "object",
                        "properties": {
                            "suggestions": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["suggestions"],
                        "additionalProperties": false
                    }),
                ),
            )
            .await?;

        let generated: GeneratedSuggestions = serde_json::from_value(object)
            .map_err(|err| DbaiError::Model(format!("malformed suggestions: {err}")))?;

        debug!("Model proposed {} suggestions", generated.suggestions.len());
        Ok(generated
            .suggestions
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .take(SUGGESTION_COUNT)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        snapshot::SnapshotStore,
        testing::{FakeSource, ScriptedModel},
    };

    #[tokio::test]
    async fn test_suggestions_are_trimmed_and_capped() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::default().with_object(json!({
            "suggestions": [
                "How many orders were placed last month?",
                "  ",
                "What is the average order total?",
                "Which customer ordered the most?",
                "How many orders per day?",
                "What is the largest order?",
                "How many orders have no customer?"
            ]
        })));
        let discovery = Arc::new(SchemaDiscovery::new(
            Arc::new(FakeSource::orders()),
            SnapshotStore::new(dir.path().join("database_structure.json")),
        ));

        let suggestions = SuggestionGenerator::new(model.clone(), discovery)
            .suggest()
            .await
            .unwrap();

        assert_eq!(suggestions.len(), SUGGESTION_COUNT);
        assert_eq!(suggestions[1], "What is the average order total?");
        assert!(model.object_prompts()[0].contains("\"table_name\":\"orders\""));
    }
}
