use std::fmt::Write as _;
use std::sync::Arc;

use tracing::{info, warn};

use super::error::AnalysisError;
use super::extract::{extract_estimate, Extraction};
use super::oracle::OracleClient;
use super::prompt::{build_image_payload, build_text_payload, OraclePayload};
use super::reconcile::reconcile;
use super::record::{Corrections, FieldOverrides, NutritionRecord, Source};
use super::timeparse::normalize_timestamp;

/// The nutrition derivation pipeline. Stateless between calls; the oracle
/// client is an explicit dependency so tests can swap in doubles that fail,
/// stall or reply with garbage.
pub struct Analyzer {
    oracle: Arc<dyn OracleClient>,
}

impl Analyzer {
    pub fn new(oracle: Arc<dyn OracleClient>) -> Self {
        Self { oracle }
    }

    /// Derives a record from a food photo, merged with caller overrides.
    /// Oracle trouble degrades to defaults; it never fails a create.
    pub async fn derive_from_image(
        &self,
        image: &[u8],
        mime: &str,
        overrides: &FieldOverrides,
    ) -> Result<NutritionRecord, AnalysisError> {
        reject_negative_overrides(overrides)?;
        let consumed_at = normalize_timestamp(overrides.consumed_at.as_deref())?;
        if overrides.is_complete() {
            return Ok(reconcile(overrides, None, None, consumed_at, Source::Image));
        }
        let payload = build_image_payload(image, mime, None)?;
        let (derived, failure) = self.consult_oracle(&payload).await;
        Ok(reconcile(
            overrides,
            derived.as_ref(),
            failure.as_deref(),
            consumed_at,
            Source::Image,
        ))
    }

    /// Derives a record from a free-text food description.
    pub async fn derive_from_text(
        &self,
        description: &str,
        overrides: &FieldOverrides,
    ) -> Result<NutritionRecord, AnalysisError> {
        reject_negative_overrides(overrides)?;
        let consumed_at = normalize_timestamp(overrides.consumed_at.as_deref())?;
        if overrides.is_complete() {
            return Ok(reconcile(overrides, None, None, consumed_at, Source::Text));
        }
        let payload = build_text_payload(description, None)?;
        let (derived, failure) = self.consult_oracle(&payload).await;
        Ok(reconcile(
            overrides,
            derived.as_ref(),
            failure.as_deref(),
            consumed_at,
            Source::Text,
        ))
    }

    /// Builds a record purely from caller-supplied values; the oracle is
    /// never consulted and absent fields resolve to defaults.
    pub fn derive_manual(
        &self,
        overrides: &FieldOverrides,
    ) -> Result<NutritionRecord, AnalysisError> {
        reject_negative_overrides(overrides)?;
        let consumed_at = normalize_timestamp(overrides.consumed_at.as_deref())?;
        Ok(reconcile(overrides, None, None, consumed_at, Source::Manual))
    }

    /// Re-derives the nutrition fields of an existing image-sourced record
    /// using corrective hints. Identity and `consumed_at` are preserved by
    /// the caller and this function respectively; old nutrition values are
    /// never consulted, the fresh oracle output always wins. Notes are
    /// replaced wholesale with the new analysis plus the applied
    /// corrections.
    pub async fn reanalyze(
        &self,
        existing: &NutritionRecord,
        image: &[u8],
        mime: &str,
        corrections: &Corrections,
    ) -> Result<NutritionRecord, AnalysisError> {
        if existing.source != Source::Image {
            return Err(AnalysisError::UnsupportedOperation(format!(
                "cannot reanalyze a record with source '{}'",
                existing.source.as_str()
            )));
        }
        if image.is_empty() {
            return Err(AnalysisError::UnsupportedOperation(
                "stored image is missing".into(),
            ));
        }

        let payload = build_image_payload(image, mime, Some(corrections))?;
        // a dead oracle here surfaces instead of clobbering stored values
        // with placeholders; only creates degrade silently
        let raw = self.oracle.complete(&payload).await?;
        let estimate = match extract_estimate(&raw) {
            Extraction::Parsed(e) => e,
            Extraction::Defaulted { estimate, reason } => {
                warn!(%reason, "reanalysis reply was malformed, using defaults");
                estimate
            }
        };

        let mut parts: Vec<String> = Vec::new();
        let commentary = estimate.notes.trim();
        if !commentary.is_empty() {
            parts.push(format!("Updated AI Analysis: {commentary}"));
        }
        if !corrections.is_empty() {
            let mut block = String::from("Applied corrections:");
            for (key, hint) in corrections {
                let _ = write!(block, "\n{}: {}", key, hint);
            }
            parts.push(block);
        }
        let notes = if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        };

        info!(food = %estimate.food_description, "reanalysis complete");
        Ok(NutritionRecord {
            food_description: estimate.food_description,
            calories: estimate.calories,
            protein_g: estimate.protein_g,
            fat_g: estimate.fat_g,
            carbs_g: estimate.carbs_g,
            fiber_g: estimate.fiber_g,
            sugar_g: estimate.sugar_g,
            sodium_mg: estimate.sodium_mg,
            meal_type: estimate.meal_type,
            consumed_at: existing.consumed_at,
            notes,
            source: Source::Image,
        })
    }
}

/// Negative numbers can only come from the caller; the extractor clamps
/// oracle output. Letting one through would persist a record violating the
/// non-negativity of every nutrition column.
fn reject_negative_overrides(overrides: &FieldOverrides) -> Result<(), AnalysisError> {
    match overrides.negative_field() {
        Some(field) => Err(AnalysisError::InvalidInput(format!(
            "{field} must not be negative"
        ))),
        None => Ok(()),
    }
}

impl Analyzer {
    /// One oracle round trip plus extraction. Returns either a complete
    /// estimate or the failure reason for the reconciler to note; never an
    /// error.
    async fn consult_oracle(
        &self,
        payload: &OraclePayload,
    ) -> (
        Option<super::extract::NutritionEstimate>,
        Option<String>,
    ) {
        match self.oracle.complete(payload).await {
            Ok(raw) => {
                let extraction = extract_estimate(&raw);
                if let Extraction::Defaulted { ref reason, .. } = extraction {
                    warn!(%reason, "oracle reply had no usable structure");
                }
                (Some(extraction.into_estimate()), None)
            }
            Err(e) => {
                warn!(error = %e, "oracle call failed, falling back to defaults");
                (None, Some(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::error::OracleError;
    use crate::analysis::extract::{DEFAULT_CALORIES, DEFAULT_FOOD_DESCRIPTION};
    use crate::analysis::record::MealType;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    struct CannedOracle {
        reply: String,
        calls: AtomicUsize,
    }

    impl CannedOracle {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl OracleClient for CannedOracle {
        async fn complete(&self, _payload: &OraclePayload) -> Result<String, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    struct DeadOracle;

    #[async_trait]
    impl OracleClient for DeadOracle {
        async fn complete(&self, _payload: &OraclePayload) -> Result<String, OracleError> {
            Err(OracleError::Transport("connection refused".into()))
        }
    }

    const GOOD_REPLY: &str = r#"Here is the analysis:
        {"food_description": "Pepperoni pizza slice", "estimated_calories": 285,
         "protein": 12, "fat": 10, "carbs": 36, "fiber": 2, "sugar": 4,
         "sodium": 640, "meal_type": "dinner", "notes": "High in sodium."}"#;

    fn image_record(consumed_at: time::OffsetDateTime) -> NutritionRecord {
        NutritionRecord {
            food_description: "Chicken skewers".into(),
            calories: 410,
            protein_g: 30,
            fat_g: 15,
            carbs_g: 25,
            fiber_g: 2,
            sugar_g: 3,
            sodium_mg: 500,
            meal_type: MealType::Dinner,
            consumed_at,
            notes: Some("old notes".into()),
            source: Source::Image,
        }
    }

    #[tokio::test]
    async fn image_derivation_reconciles_oracle_output() {
        let analyzer = Analyzer::new(CannedOracle::new(GOOD_REPLY));
        let record = analyzer
            .derive_from_image(b"jpegbytes", "image/jpeg", &FieldOverrides::default())
            .await
            .unwrap();
        assert_eq!(record.food_description, "Pepperoni pizza slice");
        assert_eq!(record.calories, 285);
        assert_eq!(record.meal_type, MealType::Dinner);
        assert_eq!(record.source, Source::Image);
        assert_eq!(record.notes.as_deref(), Some("AI Analysis: High in sodium."));
    }

    #[tokio::test]
    async fn caller_overrides_win_over_oracle_values() {
        let analyzer = Analyzer::new(CannedOracle::new(GOOD_REPLY));
        let overrides = FieldOverrides {
            calories: Some(500),
            ..Default::default()
        };
        let record = analyzer
            .derive_from_text("pizza", &overrides)
            .await
            .unwrap();
        assert_eq!(record.calories, 500);
        assert_eq!(record.protein_g, 12);
        assert_eq!(record.source, Source::Text);
    }

    #[tokio::test]
    async fn complete_overrides_skip_the_oracle_entirely() {
        let oracle = CannedOracle::new(GOOD_REPLY);
        let analyzer = Analyzer::new(oracle.clone());
        let overrides = FieldOverrides {
            food_description: Some("meal replacement shake".into()),
            calories: Some(220),
            protein_g: Some(20),
            fat_g: Some(5),
            carbs_g: Some(25),
            fiber_g: Some(3),
            sugar_g: Some(9),
            sodium_mg: Some(200),
            meal_type: Some(MealType::Breakfast),
            consumed_at: Some("2024-01-05T08:00:00Z".into()),
            notes: None,
        };
        let record = analyzer
            .derive_from_image(b"jpegbytes", "image/jpeg", &overrides)
            .await
            .unwrap();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
        assert_eq!(record.calories, 220);
        assert_eq!(record.consumed_at, datetime!(2024-01-05 08:00:00 UTC));
    }

    #[tokio::test]
    async fn oracle_failure_never_fails_a_create() {
        let analyzer = Analyzer::new(Arc::new(DeadOracle));
        let record = analyzer
            .derive_from_image(b"jpegbytes", "image/jpeg", &FieldOverrides::default())
            .await
            .unwrap();
        assert_eq!(record.food_description, DEFAULT_FOOD_DESCRIPTION);
        assert_eq!(record.calories, DEFAULT_CALORIES);
        assert_eq!(record.meal_type, MealType::Snack);
        assert!(record
            .notes
            .unwrap()
            .contains("AI analysis unavailable: oracle transport error"));
    }

    #[tokio::test]
    async fn empty_image_is_rejected_before_the_oracle() {
        let oracle = CannedOracle::new(GOOD_REPLY);
        let analyzer = Analyzer::new(oracle.clone());
        let err = analyzer
            .derive_from_image(&[], "image/jpeg", &FieldOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_timestamp_is_rejected_not_defaulted() {
        let analyzer = Analyzer::new(CannedOracle::new(GOOD_REPLY));
        let overrides = FieldOverrides {
            consumed_at: Some("yesterday at noon".into()),
            ..Default::default()
        };
        let err = analyzer
            .derive_from_text("pizza", &overrides)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidTimestamp(_)));
    }

    #[tokio::test]
    async fn reanalysis_preserves_consumed_at_and_replaces_nutrition() {
        let t0 = datetime!(2024-03-10 19:30:00 UTC);
        let analyzer = Analyzer::new(CannedOracle::new(GOOD_REPLY));
        let mut corrections = BTreeMap::new();
        corrections.insert(
            "food_type".to_string(),
            "This is pork, not chicken".to_string(),
        );
        let updated = analyzer
            .reanalyze(&image_record(t0), b"jpegbytes", "image/jpeg", &corrections)
            .await
            .unwrap();

        assert_eq!(updated.consumed_at, t0);
        assert_eq!(updated.source, Source::Image);
        assert_eq!(updated.calories, 285);
        assert_eq!(updated.food_description, "Pepperoni pizza slice");
        let notes = updated.notes.unwrap();
        assert!(notes.starts_with("Updated AI Analysis: High in sodium."));
        assert!(notes.contains("Applied corrections:"));
        assert!(notes.contains("food_type: This is pork, not chicken"));
        assert!(!notes.contains("old notes"), "prior notes are replaced");
    }

    #[tokio::test]
    async fn negative_override_is_rejected_as_caller_error() {
        let oracle = CannedOracle::new(GOOD_REPLY);
        let analyzer = Analyzer::new(oracle.clone());
        let overrides = FieldOverrides {
            calories: Some(-5),
            ..Default::default()
        };

        let err = analyzer.derive_manual(&overrides).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(ref m) if m.contains("calories")));

        let err = analyzer
            .derive_from_image(b"jpegbytes", "image/jpeg", &overrides)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);

        let err = analyzer
            .derive_from_text("pizza", &overrides)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn reanalysis_with_blank_commentary_skips_the_label() {
        const TERSE_REPLY: &str =
            r#"{"food_description": "Pork skewers", "estimated_calories": 390, "notes": "  "}"#;
        let analyzer = Analyzer::new(CannedOracle::new(TERSE_REPLY));
        let mut corrections = BTreeMap::new();
        corrections.insert(
            "food_type".to_string(),
            "This is pork, not chicken".to_string(),
        );

        let updated = analyzer
            .reanalyze(
                &image_record(datetime!(2024-03-10 19:30:00 UTC)),
                b"jpegbytes",
                "image/jpeg",
                &corrections,
            )
            .await
            .unwrap();
        let notes = updated.notes.unwrap();
        assert!(!notes.contains("Updated AI Analysis"));
        assert!(notes.starts_with("Applied corrections:"));
        assert!(notes.contains("food_type: This is pork, not chicken"));

        let updated = analyzer
            .reanalyze(
                &image_record(datetime!(2024-03-10 19:30:00 UTC)),
                b"jpegbytes",
                "image/jpeg",
                &BTreeMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(updated.notes, None, "nothing to say, nothing stored");
    }

    #[tokio::test]
    async fn reanalysis_rejects_non_image_records() {
        let analyzer = Analyzer::new(CannedOracle::new(GOOD_REPLY));
        let mut record = image_record(datetime!(2024-03-10 19:30:00 UTC));
        record.source = Source::Text;
        let err = analyzer
            .reanalyze(&record, b"jpegbytes", "image/jpeg", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedOperation(_)));
    }

    #[tokio::test]
    async fn reanalysis_surfaces_a_dead_oracle() {
        let analyzer = Analyzer::new(Arc::new(DeadOracle));
        let record = image_record(datetime!(2024-03-10 19:30:00 UTC));
        let err = analyzer
            .reanalyze(&record, b"jpegbytes", "image/jpeg", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::OracleUnavailable(_)));
    }

    #[tokio::test]
    async fn manual_derivation_fills_gaps_with_defaults() {
        let oracle = CannedOracle::new(GOOD_REPLY);
        let analyzer = Analyzer::new(oracle.clone());
        let overrides = FieldOverrides {
            food_description: Some("black coffee".into()),
            calories: Some(2),
            ..Default::default()
        };
        let record = analyzer.derive_manual(&overrides).unwrap();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
        assert_eq!(record.source, Source::Manual);
        assert_eq!(record.calories, 2);
        assert_eq!(record.protein_g, 0);
        assert_eq!(record.meal_type, MealType::Snack);
    }
}
