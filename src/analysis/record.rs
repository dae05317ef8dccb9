use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Meal category. Anything the oracle or a caller sends outside these four
/// values collapses to `Snack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl MealType {
    pub fn as_str(self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
            MealType::Snack => "snack",
        }
    }

    /// Case-insensitive parse; unknown values normalize to `Snack`.
    pub fn normalize(raw: &str) -> MealType {
        match raw.trim().to_lowercase().as_str() {
            "breakfast" => MealType::Breakfast,
            "lunch" => MealType::Lunch,
            "dinner" => MealType::Dinner,
            _ => MealType::Snack,
        }
    }
}

/// Provenance of the values in a record. Reanalysis is only valid for
/// `Image` records, since it re-reads the stored photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Image,
    Text,
    Manual,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Image => "image",
            Source::Text => "text",
            Source::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Source> {
        match raw {
            "image" => Some(Source::Image),
            "text" => Some(Source::Text),
            "manual" => Some(Source::Manual),
            _ => None,
        }
    }
}

/// Canonical output of the analysis pipeline. Every numeric field is a
/// concrete non-negative value and `consumed_at` always carries an offset;
/// reconciliation never lets an absent field through.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NutritionRecord {
    pub food_description: String,
    pub calories: i32,
    pub protein_g: i32,
    pub fat_g: i32,
    pub carbs_g: i32,
    pub fiber_g: i32,
    pub sugar_g: i32,
    pub sodium_mg: i32,
    pub meal_type: MealType,
    #[serde(with = "time::serde::rfc3339")]
    pub consumed_at: OffsetDateTime,
    pub notes: Option<String>,
    pub source: Source,
}

/// Caller-supplied values, field by field. `None` means "not provided" and
/// is the only thing that lets the oracle or a default fill the slot; an
/// explicit zero is a real value and always wins.
#[derive(Debug, Clone, Default)]
pub struct FieldOverrides {
    pub food_description: Option<String>,
    pub calories: Option<i32>,
    pub protein_g: Option<i32>,
    pub fat_g: Option<i32>,
    pub carbs_g: Option<i32>,
    pub fiber_g: Option<i32>,
    pub sugar_g: Option<i32>,
    pub sodium_mg: Option<i32>,
    pub meal_type: Option<MealType>,
    /// Raw timestamp string; repaired by the temporal normalizer.
    pub consumed_at: Option<String>,
    pub notes: Option<String>,
}

impl FieldOverrides {
    /// True when the caller supplied every derivable field, in which case
    /// the oracle has nothing left to fill and is not invoked.
    pub fn is_complete(&self) -> bool {
        self.food_description.is_some()
            && self.calories.is_some()
            && self.protein_g.is_some()
            && self.fat_g.is_some()
            && self.carbs_g.is_some()
            && self.fiber_g.is_some()
            && self.sugar_g.is_some()
            && self.sodium_mg.is_some()
            && self.meal_type.is_some()
            && self.consumed_at.is_some()
    }

    /// Name of the first negative numeric override, if any. Negative values
    /// are caller errors and rejected before reconciliation.
    pub fn negative_field(&self) -> Option<&'static str> {
        [
            ("calories", self.calories),
            ("protein_g", self.protein_g),
            ("fat_g", self.fat_g),
            ("carbs_g", self.carbs_g),
            ("fiber_g", self.fiber_g),
            ("sugar_g", self.sugar_g),
            ("sodium_mg", self.sodium_mg),
        ]
        .into_iter()
        .find(|(_, v)| matches!(v, Some(n) if *n < 0))
        .map(|(name, _)| name)
    }
}

/// Free-text corrective hints for a reanalysis call, e.g.
/// `"food_type" -> "This is pork, not chicken"`. Never persisted as
/// structured data; only folded into the prompt and the resulting notes.
pub type Corrections = BTreeMap<String, String>;
