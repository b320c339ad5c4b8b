// Validation Layer - edge checks for raw selection input
// Raw UI-shaped strings are checked here before the typed constructors run,
// so a rejected selection never reaches a provider.

use crate::types::{ValidatedDateRange, ValidatedTableName};
use anyhow::{bail, Result};
use std::collections::HashMap;

/// Validation errors with structured context.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Precondition failed: {condition}")]
    PreconditionFailed { condition: String, context: String },

    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Invariant violated: {invariant}")]
    InvariantViolated { invariant: String, state: String },
}

/// Validation context for better error messages.
#[derive(Clone)]
pub struct ValidationContext {
    operation: String,
    attributes: HashMap<String, String>,
}

impl ValidationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn validate(self, condition: bool, message: &str) -> Result<()> {
        if !condition {
            let context = format!(
                "Operation: {}, Attributes: {:?}",
                self.operation, self.attributes
            );
            bail!(ValidationError::PreconditionFailed {
                condition: message.to_string(),
                context,
            });
        }
        Ok(())
    }
}

/// Checks for raw request input, before typed construction.
pub mod request {
    use super::*;

    /// Validate a raw table selection. Delegates the character-level rules to
    /// the typed constructor so there is a single source of truth.
    pub fn validate_table_selection(name: &str) -> Result<()> {
        let ctx = ValidationContext::new("validate_table_selection").with_attribute("table", name);
        ctx.validate(!name.trim().is_empty(), "A table must be selected")?;

        match ValidatedTableName::new(name) {
            Ok(_) => Ok(()),
            Err(err) => bail!(ValidationError::InvalidInput {
                field: "table".to_string(),
                reason: err.to_string(),
            }),
        }
    }

    /// Validate a raw date-range selection (`YYYY-MM-DD` strings).
    pub fn validate_date_inputs(start: &str, end: &str) -> Result<()> {
        let ctx = ValidationContext::new("validate_date_inputs")
            .with_attribute("start", start)
            .with_attribute("end", end);
        ctx.clone()
            .validate(!start.trim().is_empty(), "A start date must be selected")?;
        ctx.validate(!end.trim().is_empty(), "An end date must be selected")?;

        match ValidatedDateRange::parse(start.trim(), end.trim()) {
            Ok(_) => Ok(()),
            Err(err) => bail!(ValidationError::InvalidInput {
                field: "date_range".to_string(),
                reason: err.to_string(),
            }),
        }
    }

    /// Validate a raw segment label.
    pub fn validate_segment_label(label: &str) -> Result<()> {
        let ctx =
            ValidationContext::new("validate_segment_label").with_attribute("segment", label);
        ctx.clone()
            .validate(!label.trim().is_empty(), "Segment label cannot be blank")?;
        ctx.validate(
            label.trim().len() <= 256,
            "Segment label too long (max 256 chars)",
        )?;
        Ok(())
    }

    /// Validate a raw `YYYY-MM` month key.
    pub fn validate_month_key(value: &str) -> Result<()> {
        match crate::types::MonthKey::parse(value.trim()) {
            Ok(_) => Ok(()),
            Err(err) => bail!(ValidationError::InvalidInput {
                field: "month".to_string(),
                reason: err.to_string(),
            }),
        }
    }
}
