use serde_json::{Map, Value};
use tracing::warn;

use super::record::MealType;

pub const DEFAULT_FOOD_DESCRIPTION: &str = "Unknown food";
pub const DEFAULT_CALORIES: i32 = 300;
const DEFAULT_DIAGNOSTIC: &str = "Could not analyze the response properly.";

/// Complete set of oracle-derived values. Built from whatever subset of the
/// ten keys the oracle actually produced; missing keys are back-filled with
/// the documented defaults, field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct NutritionEstimate {
    pub food_description: String,
    pub calories: i32,
    pub protein_g: i32,
    pub fat_g: i32,
    pub carbs_g: i32,
    pub fiber_g: i32,
    pub sugar_g: i32,
    pub sodium_mg: i32,
    pub meal_type: MealType,
    pub notes: String,
}

impl NutritionEstimate {
    pub fn fallback(diagnostic: impl Into<String>) -> Self {
        Self {
            food_description: DEFAULT_FOOD_DESCRIPTION.to_string(),
            calories: DEFAULT_CALORIES,
            protein_g: 0,
            fat_g: 0,
            carbs_g: 0,
            fiber_g: 0,
            sugar_g: 0,
            sodium_mg: 0,
            meal_type: MealType::Snack,
            notes: diagnostic.into(),
        }
    }
}

/// Outcome of scraping the oracle's free-text reply. Malformed input never
/// raises; it degrades to a labeled default estimate.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A JSON object was found; absent keys were back-filled.
    Parsed(NutritionEstimate),
    /// No parseable object anywhere in the reply.
    Defaulted {
        estimate: NutritionEstimate,
        reason: String,
    },
}

impl Extraction {
    pub fn into_estimate(self) -> NutritionEstimate {
        match self {
            Extraction::Parsed(e) => e,
            Extraction::Defaulted { estimate, .. } => estimate,
        }
    }
}

/// Scrapes a structured nutrition estimate out of raw oracle text, tolerating
/// explanatory prose around the JSON payload.
pub fn extract_estimate(raw: &str) -> Extraction {
    match find_json_object(raw) {
        Some(obj) => Extraction::Parsed(estimate_from_object(&obj)),
        None => {
            warn!("no parseable JSON object in oracle reply, using defaults");
            Extraction::Defaulted {
                estimate: NutritionEstimate::fallback(DEFAULT_DIAGNOSTIC),
                reason: "no JSON object found in response".into(),
            }
        }
    }
}

/// Finds the first parseable `{...}` span. Newlines are stripped first, then
/// a greedy first-brace-to-last-brace attempt, then balanced spans scanned
/// left to right.
fn find_json_object(text: &str) -> Option<Map<String, Value>> {
    let flat: String = text.chars().filter(|c| *c != '\n' && *c != '\r').collect();

    let start = flat.find('{')?;
    let end = flat.rfind('}')?;
    if end > start {
        if let Some(obj) = parse_object(&flat[start..=end]) {
            return Some(obj);
        }
    }

    let found = balanced_spans(&flat).find_map(parse_object);
    found
}

fn parse_object(span: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Iterator over balanced `{...}` candidate spans, one per opening brace,
/// left to right. String-literal aware so braces inside quoted values do not
/// break the depth count. Braces that never close yield no span.
fn balanced_spans(text: &str) -> impl Iterator<Item = &str> {
    let opens: Vec<usize> = text
        .char_indices()
        .filter(|&(_, c)| c == '{')
        .map(|(i, _)| i)
        .collect();
    let mut spans = Vec::new();
    for open in opens {
        if let Some(close) = matching_close(&text[open..]) {
            spans.push(&text[open..=open + close]);
        }
    }
    spans.into_iter()
}

/// Byte offset of the `}` matching the `{` at the start of `text`.
fn matching_close(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn estimate_from_object(obj: &Map<String, Value>) -> NutritionEstimate {
    NutritionEstimate {
        food_description: string_field(obj, "food_description", DEFAULT_FOOD_DESCRIPTION),
        calories: int_field(obj, "estimated_calories", DEFAULT_CALORIES),
        protein_g: int_field(obj, "protein", 0),
        fat_g: int_field(obj, "fat", 0),
        carbs_g: int_field(obj, "carbs", 0),
        fiber_g: int_field(obj, "fiber", 0),
        sugar_g: int_field(obj, "sugar", 0),
        sodium_mg: int_field(obj, "sodium", 0),
        meal_type: obj
            .get("meal_type")
            .and_then(Value::as_str)
            .map(MealType::normalize)
            .unwrap_or(MealType::Snack),
        notes: string_field(obj, "notes", ""),
    }
}

fn string_field(obj: &Map<String, Value>, key: &str, default: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => default.to_string(),
    }
}

/// Tolerant integer read: JSON numbers (floats rounded) and numeric strings
/// both count; anything else, and anything negative, resolves to the default
/// or zero respectively.
fn int_field(obj: &Map<String, Value>, key: &str, default: i32) -> i32 {
    let value = match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match value {
        Some(v) if v.is_finite() => (v.round() as i64).clamp(0, i64::from(i32::MAX)) as i32,
        _ => default,
    }
}
