use base64::{engine::general_purpose, Engine as _};
use std::fmt::Write as _;

use super::error::AnalysisError;
use super::record::Corrections;

/// Fixed instruction sent with every estimation request. Lists the ten
/// expected keys so the reply can be scraped back out as JSON.
const NUTRITION_INSTRUCTION: &str = "\
Analyze this food and provide the following nutritional information in JSON format:
1. Food description: what food items are present?
2. Estimated calories: a reasonable estimate of total calories.
3. Protein: estimated protein content in grams.
4. Fat: estimated fat content in grams.
5. Carbohydrates: estimated carbohydrate content in grams.
6. Fiber: estimated fiber content in grams.
7. Sugar: estimated sugar content in grams.
8. Sodium: estimated sodium content in milligrams.
9. Meal type: categorize as breakfast, lunch, dinner, or snack.
10. Notes: any additional nutritional information or observations.

Format your response as a valid JSON object with these keys:
{
    \"food_description\": \"string\",
    \"estimated_calories\": number,
    \"protein\": number,
    \"fat\": number,
    \"carbs\": number,
    \"fiber\": number,
    \"sugar\": number,
    \"sodium\": number,
    \"meal_type\": \"breakfast|lunch|dinner|snack\",
    \"notes\": \"string\"
}";

/// Input half of an oracle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadContent {
    /// Base64-encoded image plus its mime type.
    Image { data: String, mime: String },
    Text(String),
}

/// A fully built oracle request: one natural-language instruction and the
/// content to estimate from. Pure data, no side effects.
#[derive(Debug, Clone)]
pub struct OraclePayload {
    pub instruction: String,
    pub content: PayloadContent,
}

pub fn build_image_payload(
    image: &[u8],
    mime: &str,
    corrections: Option<&Corrections>,
) -> Result<OraclePayload, AnalysisError> {
    if image.is_empty() {
        return Err(AnalysisError::InvalidInput("image is empty".into()));
    }
    let mime = if mime.trim().is_empty() { "image/jpeg" } else { mime };
    Ok(OraclePayload {
        instruction: instruction_with_corrections(corrections),
        content: PayloadContent::Image {
            data: general_purpose::STANDARD.encode(image),
            mime: mime.to_string(),
        },
    })
}

pub fn build_text_payload(
    description: &str,
    corrections: Option<&Corrections>,
) -> Result<OraclePayload, AnalysisError> {
    let description = description.trim();
    if description.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "food description is empty".into(),
        ));
    }
    Ok(OraclePayload {
        instruction: instruction_with_corrections(corrections),
        content: PayloadContent::Text(description.to_string()),
    })
}

/// Appends corrective hints as explicit guidance after the fixed prompt.
fn instruction_with_corrections(corrections: Option<&Corrections>) -> String {
    let mut instruction = NUTRITION_INSTRUCTION.to_string();
    if let Some(corrections) = corrections.filter(|c| !c.is_empty()) {
        instruction.push_str("\n\nThe user states:");
        for (key, hint) in corrections {
            let _ = write!(instruction, "\n{}: {}", key, hint);
        }
    }
    instruction
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn image_payload_encodes_base64_and_keeps_mime() {
        let p = build_image_payload(b"\x00\x01\x02", "image/png", None).unwrap();
        match p.content {
            PayloadContent::Image { data, mime } => {
                assert_eq!(data, "AAEC");
                assert_eq!(mime, "image/png");
            }
            other => panic!("unexpected content: {other:?}"),
        }
        assert!(p.instruction.contains("\"estimated_calories\""));
        assert!(p.instruction.contains("breakfast|lunch|dinner|snack"));
    }

    #[test]
    fn image_payload_defaults_blank_mime_to_jpeg() {
        let p = build_image_payload(b"x", " ", None).unwrap();
        match p.content {
            PayloadContent::Image { mime, .. } => assert_eq!(mime, "image/jpeg"),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn empty_image_is_rejected_before_any_call() {
        let err = build_image_payload(&[], "image/jpeg", None).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    #[test]
    fn blank_text_is_rejected() {
        let err = build_text_payload("   \n", None).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    #[test]
    fn corrections_are_appended_as_guidance() {
        let mut corrections = BTreeMap::new();
        corrections.insert(
            "food_type".to_string(),
            "This is pork, not chicken".to_string(),
        );
        let p = build_text_payload("grilled meat plate", Some(&corrections)).unwrap();
        assert!(p.instruction.contains("The user states:"));
        assert!(p
            .instruction
            .contains("food_type: This is pork, not chicken"));
    }

    #[test]
    fn empty_corrections_leave_instruction_untouched() {
        let corrections = BTreeMap::new();
        let p = build_text_payload("toast", Some(&corrections)).unwrap();
        assert!(!p.instruction.contains("The user states:"));
    }
}
