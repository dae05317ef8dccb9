use anyhow::Context;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::analysis::{MealType, NutritionRecord, Source};

#[derive(Debug, Clone, FromRow)]
pub struct MealRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub food_description: String,
    pub calories: i32,
    pub protein_g: i32,
    pub fat_g: i32,
    pub carbs_g: i32,
    pub fiber_g: i32,
    pub sugar_g: i32,
    pub sodium_mg: i32,
    pub meal_type: String,
    pub consumed_at: OffsetDateTime,
    pub notes: Option<String>,
    pub source: String,
    pub image_key: Option<String>,
    pub image_mime: Option<String>,
    pub created_at: OffsetDateTime,
}

const MEAL_COLUMNS: &str = "id, user_id, food_description, calories, protein_g, fat_g, \
     carbs_g, fiber_g, sugar_g, sodium_mg, meal_type, consumed_at, notes, source, \
     image_key, image_mime, created_at";

impl MealRow {
    /// Domain view of a stored row, as the analysis pipeline expects it.
    pub fn record(&self) -> NutritionRecord {
        NutritionRecord {
            food_description: self.food_description.clone(),
            calories: self.calories,
            protein_g: self.protein_g,
            fat_g: self.fat_g,
            carbs_g: self.carbs_g,
            fiber_g: self.fiber_g,
            sugar_g: self.sugar_g,
            sodium_mg: self.sodium_mg,
            meal_type: MealType::normalize(&self.meal_type),
            consumed_at: self.consumed_at,
            notes: self.notes.clone(),
            source: Source::parse(&self.source).unwrap_or(Source::Manual),
        }
    }
}

pub async fn insert(
    db: &PgPool,
    user_id: Uuid,
    record: &NutritionRecord,
    image_key: Option<&str>,
    image_mime: Option<&str>,
) -> anyhow::Result<MealRow> {
    let row = sqlx::query_as::<_, MealRow>(&format!(
        r#"
        INSERT INTO meals (id, user_id, food_description, calories, protein_g, fat_g,
                           carbs_g, fiber_g, sugar_g, sodium_mg, meal_type, consumed_at,
                           notes, source, image_key, image_mime)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        RETURNING {MEAL_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(&record.food_description)
    .bind(record.calories)
    .bind(record.protein_g)
    .bind(record.fat_g)
    .bind(record.carbs_g)
    .bind(record.fiber_g)
    .bind(record.sugar_g)
    .bind(record.sodium_mg)
    .bind(record.meal_type.as_str())
    .bind(record.consumed_at)
    .bind(&record.notes)
    .bind(record.source.as_str())
    .bind(image_key)
    .bind(image_mime)
    .fetch_one(db)
    .await
    .context("insert meal")?;
    Ok(row)
}

pub async fn get(db: &PgPool, user_id: Uuid, meal_id: Uuid) -> anyhow::Result<Option<MealRow>> {
    let row = sqlx::query_as::<_, MealRow>(&format!(
        r#"
        SELECT {MEAL_COLUMNS}
        FROM meals
        WHERE id = $1 AND user_id = $2
        "#
    ))
    .bind(meal_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("get meal")?;
    Ok(row)
}

pub async fn list_by_user(
    db: &PgPool,
    user_id: Uuid,
    from: Option<OffsetDateTime>,
    to: Option<OffsetDateTime>,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<MealRow>> {
    let rows = sqlx::query_as::<_, MealRow>(&format!(
        r#"
        SELECT {MEAL_COLUMNS}
        FROM meals
        WHERE user_id = $1
          AND ($2::timestamptz IS NULL OR consumed_at >= $2)
          AND ($3::timestamptz IS NULL OR consumed_at < $3)
        ORDER BY consumed_at DESC
        LIMIT $4 OFFSET $5
        "#
    ))
    .bind(user_id)
    .bind(from)
    .bind(to)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .context("list meals")?;
    Ok(rows)
}

/// Replaces the derived nutrition fields and notes of an existing record.
/// Identity, `consumed_at`, source and image reference stay untouched; this
/// is the persistence half of reanalysis.
pub async fn update_nutrition(
    db: &PgPool,
    user_id: Uuid,
    meal_id: Uuid,
    record: &NutritionRecord,
) -> anyhow::Result<MealRow> {
    let row = sqlx::query_as::<_, MealRow>(&format!(
        r#"
        UPDATE meals
        SET food_description = $3, calories = $4, protein_g = $5, fat_g = $6,
            carbs_g = $7, fiber_g = $8, sugar_g = $9, sodium_mg = $10,
            meal_type = $11, notes = $12
        WHERE id = $1 AND user_id = $2
        RETURNING {MEAL_COLUMNS}
        "#
    ))
    .bind(meal_id)
    .bind(user_id)
    .bind(&record.food_description)
    .bind(record.calories)
    .bind(record.protein_g)
    .bind(record.fat_g)
    .bind(record.carbs_g)
    .bind(record.fiber_g)
    .bind(record.sugar_g)
    .bind(record.sodium_mg)
    .bind(record.meal_type.as_str())
    .bind(&record.notes)
    .fetch_one(db)
    .await
    .context("update meal nutrition")?;
    Ok(row)
}

pub async fn delete(db: &PgPool, user_id: Uuid, meal_id: Uuid) -> anyhow::Result<Option<MealRow>> {
    let row = sqlx::query_as::<_, MealRow>(&format!(
        r#"
        DELETE FROM meals
        WHERE id = $1 AND user_id = $2
        RETURNING {MEAL_COLUMNS}
        "#
    ))
    .bind(meal_id)
    .bind(user_id)
    .fetch_optional(db)
    .await
    .context("delete meal")?;
    Ok(row)
}

/// Consumption instants and calories in a half-open range, for the summary
/// endpoint. Grouping per calendar day happens in the handler.
pub async fn calories_between(
    db: &PgPool,
    user_id: Uuid,
    from: OffsetDateTime,
    to: OffsetDateTime,
) -> anyhow::Result<Vec<(OffsetDateTime, i32)>> {
    let rows = sqlx::query_as::<_, (OffsetDateTime, i32)>(
        r#"
        SELECT consumed_at, calories
        FROM meals
        WHERE user_id = $1 AND consumed_at >= $2 AND consumed_at < $3
        ORDER BY consumed_at ASC
        "#,
    )
    .bind(user_id)
    .bind(from)
    .bind(to)
    .fetch_all(db)
    .await
    .context("summary query")?;
    Ok(rows)
}
