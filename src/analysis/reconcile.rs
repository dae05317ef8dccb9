use time::OffsetDateTime;

use super::extract::{NutritionEstimate, DEFAULT_CALORIES, DEFAULT_FOOD_DESCRIPTION};
use super::record::{FieldOverrides, MealType, NutritionRecord, Source};

/// Ordered coalesce used for every field: explicit caller value, then
/// oracle-derived value, then the hardcoded default.
fn pick<T>(caller: Option<T>, derived: Option<T>, default: T) -> T {
    caller.or(derived).unwrap_or(default)
}

/// Field-by-field merge of caller overrides, the oracle estimate (if one was
/// computed) and the documented defaults. Each field is resolved
/// independently; a caller may pin `calories` while leaving `protein_g` to
/// the oracle. `failure_note` carries the reason when the oracle call itself
/// failed, in which case every derived slot falls through to its default.
pub fn reconcile(
    overrides: &FieldOverrides,
    derived: Option<&NutritionEstimate>,
    failure_note: Option<&str>,
    consumed_at: OffsetDateTime,
    source: Source,
) -> NutritionRecord {
    NutritionRecord {
        food_description: pick(
            overrides.food_description.clone(),
            derived.map(|d| d.food_description.clone()),
            DEFAULT_FOOD_DESCRIPTION.to_string(),
        ),
        calories: pick(
            overrides.calories,
            derived.map(|d| d.calories),
            DEFAULT_CALORIES,
        ),
        protein_g: pick(overrides.protein_g, derived.map(|d| d.protein_g), 0),
        fat_g: pick(overrides.fat_g, derived.map(|d| d.fat_g), 0),
        carbs_g: pick(overrides.carbs_g, derived.map(|d| d.carbs_g), 0),
        fiber_g: pick(overrides.fiber_g, derived.map(|d| d.fiber_g), 0),
        sugar_g: pick(overrides.sugar_g, derived.map(|d| d.sugar_g), 0),
        sodium_mg: pick(overrides.sodium_mg, derived.map(|d| d.sodium_mg), 0),
        meal_type: pick(
            overrides.meal_type,
            derived.map(|d| d.meal_type),
            MealType::Snack,
        ),
        consumed_at,
        notes: combine_notes(
            overrides.notes.as_deref(),
            derived.map(|d| d.notes.as_str()),
            failure_note,
        ),
        source,
    }
}

/// Notes are the one field that concatenates instead of coalescing: the
/// caller's own notes come first, then the oracle commentary under an
/// "AI Analysis:" label, joined with a blank line.
fn combine_notes(
    user: Option<&str>,
    oracle: Option<&str>,
    failure: Option<&str>,
) -> Option<String> {
    let user = user.map(str::trim).filter(|s| !s.is_empty());
    let analysis = match failure {
        Some(reason) => Some(format!("AI analysis unavailable: {reason}")),
        None => oracle
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("AI Analysis: {s}")),
    };

    match (user, analysis) {
        (Some(u), Some(a)) => Some(format!("{u}\n\n{a}")),
        (Some(u), None) => Some(u.to_string()),
        (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}
