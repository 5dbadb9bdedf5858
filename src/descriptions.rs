//! # Column descriptions
//!
//! Asks the model for a short description of every column in the snapshot and
//! writes the answers back. Each row takes the description whose
//! `(table_name, column_name)` matches it exactly; descriptions for columns the
//! snapshot does not contain are ignored, and rows the model skipped keep
//! whatever description they already had.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    discovery::SchemaDiscovery,
    error::{DbaiError, Result},
    llm::{LanguageModel, ObjectSchema},
    snapshot::TableRow,
};

const DESCRIPTION_SYSTEM_PROMPT: &str = "You are a database description generator.";

#[derive(Debug, Deserialize)]
struct GeneratedDescriptions {
    descriptions: Vec<ColumnDescription>,
}

#[derive(Debug, Deserialize)]
struct ColumnDescription {
    table_name: String,
    column_name: String,
    description: String,
}

pub struct DescriptionGenerator {
    model: Arc<dyn LanguageModel>,
    discovery: Arc<SchemaDiscovery>,
}

impl DescriptionGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, discovery: Arc<SchemaDiscovery>) -> Self {
        Self { model, discovery }
    }

    /// Describe every column and persist the result.
    ///
    /// # Returns
    /// The annotated rows that were merged into the snapshot.
    ///
    /// # Errors
    /// [`DbaiError::Model`] when the call fails or the answer does not match the
    /// expected shape. Nothing is written in that case.
    pub async fn generate_descriptions(&self) -> Result<Vec<TableRow>> {
        let rows = self.discovery.snapshot_or_discover().await?;
        let structure = serde_json::to_string_pretty(&rows)
            .map_err(|err| DbaiError::Snapshot(err.to_string()))?;

        let prompt = format!(
            "You are given the following database structure:\n{structure}\n\
             Generate an informative description for each column in the database based on \
             the table name, column name and other columns in the same table or other tables."
        );

        debug!("Requesting descriptions for {} columns", rows.len());
        let object = self
            .model
            .generate_object(DESCRIPTION_SYSTEM_PROMPT, &prompt, descriptions_schema())
            .await?;

        let generated: GeneratedDescriptions = serde_json::from_value(object)
            .map_err(|err| DbaiError::Model(format!("malformed descriptions: {err}")))?;

        let annotated = apply_descriptions(rows, &generated.descriptions);
        self.discovery.snapshot().update(annotated.clone())?;

        info!(
            "Stored descriptions for {} of {} columns",
            annotated.iter().filter(|row| row.description.is_some()).count(),
            annotated.len()
        );
        Ok(annotated)
    }
}

fn apply_descriptions(rows: Vec<TableRow>, descriptions: &[ColumnDescription]) -> Vec<TableRow> {
    rows.into_iter()
        .map(|row| {
            let description = descriptions
                .iter()
                .find(|d| d.table_name == row.table_name && d.column_name == row.column_name)
                .map(|d| d.description.clone());
            TableRow { description, ..row }
        })
        .collect()
}

fn descriptions_schema() -> ObjectSchema {
    ObjectSchema::new(
        "column_descriptions",
        json!({
            "type": "object",
            "properties": {
                "descriptions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "description": {"type": "string"},
                            "table_name": {"type": "string"},
                            "column_name": {"type": "string"}
                        },
                        "required": ["description", "table_name", "column_name"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["descriptions"],
            "additionalProperties": false
        }),
    )
}
