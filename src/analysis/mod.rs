//! AI-assisted nutrition extraction and reconciliation.
//!
//! Given a food photo or a free-text description, builds an oracle request,
//! scrapes a structured estimate out of the unreliable textual reply and
//! merges it with caller overrides and defaults into one canonical
//! [`NutritionRecord`]. Library-level; the only I/O is the oracle call
//! behind the [`OracleClient`] trait.

mod error;
mod extract;
mod oracle;
mod pipeline;
mod prompt;
mod reconcile;
mod record;
mod timeparse;

pub use error::{AnalysisError, OracleError};
pub use extract::{extract_estimate, Extraction, NutritionEstimate};
pub use oracle::{OpenAiClient, OracleClient};
pub use pipeline::Analyzer;
pub use prompt::{build_image_payload, build_text_payload, OraclePayload, PayloadContent};
pub use record::{Corrections, FieldOverrides, MealType, NutritionRecord, Source};
pub use timeparse::{normalize_timestamp, parse_flexible};
