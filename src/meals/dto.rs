use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::analysis::{FieldOverrides, MealType};

use super::repo::MealRow;

/// Optional caller-supplied field values, shared by every create endpoint.
/// Absent fields are left to the oracle or the defaults; `meal_type` is
/// normalized (unknown values collapse to snack) rather than rejected.
#[derive(Debug, Default, Deserialize)]
pub struct OverrideBody {
    pub food_description: Option<String>,
    pub calories: Option<i32>,
    pub protein_g: Option<i32>,
    pub fat_g: Option<i32>,
    pub carbs_g: Option<i32>,
    pub fiber_g: Option<i32>,
    pub sugar_g: Option<i32>,
    pub sodium_mg: Option<i32>,
    pub meal_type: Option<String>,
    pub consumed_at: Option<String>,
    pub notes: Option<String>,
}

impl From<OverrideBody> for FieldOverrides {
    fn from(b: OverrideBody) -> Self {
        FieldOverrides {
            food_description: b.food_description,
            calories: b.calories,
            protein_g: b.protein_g,
            fat_g: b.fat_g,
            carbs_g: b.carbs_g,
            fiber_g: b.fiber_g,
            sugar_g: b.sugar_g,
            sodium_mg: b.sodium_mg,
            meal_type: b.meal_type.as_deref().map(MealType::normalize),
            consumed_at: b.consumed_at,
            notes: b.notes,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTextMealRequest {
    pub description: String,
    #[serde(flatten)]
    pub overrides: OverrideBody,
}

#[derive(Debug, Deserialize)]
pub struct ReanalyzeRequest {
    #[serde(default)]
    pub corrections: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct MealResponse {
    pub id: Uuid,
    pub food_description: String,
    pub calories: i32,
    pub protein_g: i32,
    pub fat_g: i32,
    pub carbs_g: i32,
    pub fiber_g: i32,
    pub sugar_g: i32,
    pub sodium_mg: i32,
    pub meal_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub consumed_at: OffsetDateTime,
    pub notes: Option<String>,
    pub source: String,
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl MealResponse {
    pub fn from_row(row: MealRow, image_url: Option<String>) -> Self {
        Self {
            id: row.id,
            food_description: row.food_description,
            calories: row.calories,
            protein_g: row.protein_g,
            fat_g: row.fat_g,
            carbs_g: row.carbs_g,
            fiber_g: row.fiber_g,
            sugar_g: row.sugar_g,
            sodium_mg: row.sodium_mg,
            meal_type: row.meal_type,
            consumed_at: row.consumed_at,
            notes: row.notes,
            source: row.source,
            image_url,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub from: Option<String>,
    pub to: Option<String>,
}
fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DailySummary {
    /// Calendar day in UTC, `YYYY-MM-DD`.
    pub date: String,
    pub total_calories: i64,
    pub meals: i64,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    #[serde(with = "time::serde::rfc3339")]
    pub from: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub to: OffsetDateTime,
    pub days: Vec<DailySummary>,
}
