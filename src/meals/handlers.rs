use std::collections::BTreeMap;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::analysis::{parse_flexible, AnalysisError, FieldOverrides, NutritionRecord};
use crate::auth::jwt::AuthUser;
use crate::state::AppState;

use super::dto::{
    CreateTextMealRequest, DailySummary, MealResponse, OverrideBody, Pagination,
    ReanalyzeRequest, SummaryQuery, SummaryResponse,
};
use super::repo::{self, MealRow};

const PRESIGN_TTL_SECS: u64 = 30 * 60;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/meals", get(list_meals))
        .route("/meals/:id", get(get_meal))
        .route("/summary", get(summary))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/meals", post(create_from_image))
        .route("/meals/text", post(create_from_text))
        .route("/meals/manual", post(create_manual))
        .route("/meals/:id/reanalyze", post(reanalyze))
        .route("/meals/:id", delete(delete_meal))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    error!(error = %e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
}

fn rejected(e: AnalysisError) -> (StatusCode, String) {
    e.into_response_tuple()
}

fn bad_multipart(e: axum::extract::multipart::MultipartError) -> (StatusCode, String) {
    warn!(error = %e, "malformed multipart body");
    (StatusCode::BAD_REQUEST, "malformed multipart body".into())
}

async fn respond(state: &AppState, row: MealRow) -> MealResponse {
    let image_url = match &row.image_key {
        Some(key) => match state.storage.presign_get(key, PRESIGN_TTL_SECS).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, key, "presign failed, omitting image_url");
                None
            }
        },
        None => None,
    };
    MealResponse::from_row(row, image_url)
}

// --- create ---

/// POST /meals (multipart): an `image` part plus optional override fields
/// as text parts. The oracle estimates whatever the caller left out; oracle
/// trouble degrades to defaults and never fails the request.
#[instrument(skip(state, mp))]
async fn create_from_image(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<(StatusCode, Json<MealResponse>), (StatusCode, String)> {
    let mut image: Option<(Bytes, String)> = None;
    let mut body = OverrideBody::default();

    loop {
        let field = match mp.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(bad_multipart(e)),
        };
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            let mime = field
                .content_type()
                .map(str::to_string)
                .unwrap_or_else(|| "image/jpeg".into());
            let data = field.bytes().await.map_err(bad_multipart)?;
            image = Some((data, mime));
            continue;
        }
        let text = field.text().await.map_err(bad_multipart)?;
        apply_override_field(&mut body, &name, &text)?;
    }

    let Some((data, mime)) = image else {
        return Err((StatusCode::BAD_REQUEST, "image part is required".into()));
    };

    let overrides: FieldOverrides = body.into();
    let record = state
        .analyzer
        .derive_from_image(&data, &mime, &overrides)
        .await
        .map_err(rejected)?;

    let key = image_key(user_id, &mime);
    state
        .storage
        .put_object(&key, data, &mime)
        .await
        .map_err(internal)?;

    let row = repo::insert(&state.db, user_id, &record, Some(key.as_str()), Some(mime.as_str()))
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(respond(&state, row).await)))
}

/// POST /meals/text: free-text description, the oracle fills the gaps.
#[instrument(skip(state, body))]
async fn create_from_text(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<CreateTextMealRequest>,
) -> Result<(StatusCode, Json<MealResponse>), (StatusCode, String)> {
    let overrides: FieldOverrides = body.overrides.into();
    let record = state
        .analyzer
        .derive_from_text(&body.description, &overrides)
        .await
        .map_err(rejected)?;
    let row = repo::insert(&state.db, user_id, &record, None, None)
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(respond(&state, row).await)))
}

/// POST /meals/manual: caller-supplied values only, no oracle call.
#[instrument(skip(state, body))]
async fn create_manual(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<OverrideBody>,
) -> Result<(StatusCode, Json<MealResponse>), (StatusCode, String)> {
    let overrides: FieldOverrides = body.into();
    let record = state.analyzer.derive_manual(&overrides).map_err(rejected)?;
    let row = repo::insert(&state.db, user_id, &record, None, None)
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(respond(&state, row).await)))
}

// --- reanalyze ---

/// POST /meals/:id/reanalyze: re-derives nutrition fields from the stored
/// photo plus corrective hints. Identity and consumed_at never change; only
/// image-sourced records qualify.
#[instrument(skip(state, body))]
async fn reanalyze(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<ReanalyzeRequest>,
) -> Result<Json<MealResponse>, (StatusCode, String)> {
    let row = repo::get(&state.db, user_id, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "meal not found".to_string()))?;

    let existing = row.record();
    let Some(key) = row.image_key.as_deref() else {
        return Err(rejected(AnalysisError::UnsupportedOperation(
            "record has no stored image".into(),
        )));
    };
    let image = state.storage.get_object(key).await.map_err(internal)?;
    let mime = row.image_mime.as_deref().unwrap_or("image/jpeg");

    let updated: NutritionRecord = state
        .analyzer
        .reanalyze(&existing, &image, mime, &body.corrections)
        .await
        .map_err(rejected)?;

    let row = repo::update_nutrition(&state.db, user_id, id, &updated)
        .await
        .map_err(internal)?;
    Ok(Json(respond(&state, row).await))
}

// --- read ---

#[instrument(skip(state))]
async fn list_meals(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<MealResponse>>, (StatusCode, String)> {
    let from = parse_optional_instant(p.from.as_deref())?;
    let to = parse_optional_instant(p.to.as_deref())?;
    let rows = repo::list_by_user(&state.db, user_id, from, to, p.limit.clamp(1, 200), p.offset)
        .await
        .map_err(internal)?;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(respond(&state, row).await);
    }
    Ok(Json(items))
}

#[instrument(skip(state))]
async fn get_meal(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MealResponse>, (StatusCode, String)> {
    let row = repo::get(&state.db, user_id, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "meal not found".to_string()))?;
    Ok(Json(respond(&state, row).await))
}

#[instrument(skip(state))]
async fn delete_meal(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let row = repo::delete(&state.db, user_id, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "meal not found".to_string()))?;
    if let Some(key) = row.image_key.as_deref() {
        if let Err(e) = state.storage.delete_object(key).await {
            warn!(error = %e, key, "orphaned image after meal delete");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
async fn summary(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, (StatusCode, String)> {
    let from = parse_flexible(&q.from).map_err(rejected)?;
    let to = parse_flexible(&q.to).map_err(rejected)?;
    let rows = repo::calories_between(&state.db, user_id, from, to)
        .await
        .map_err(internal)?;
    Ok(Json(SummaryResponse {
        from,
        to,
        days: daily_totals(&rows),
    }))
}

// --- helpers ---

fn parse_optional_instant(
    raw: Option<&str>,
) -> Result<Option<OffsetDateTime>, (StatusCode, String)> {
    raw.map(|s| parse_flexible(s).map_err(rejected)).transpose()
}

fn apply_override_field(
    body: &mut OverrideBody,
    name: &str,
    value: &str,
) -> Result<(), (StatusCode, String)> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(());
    }
    let mut int = |target: &mut Option<i32>| -> Result<(), (StatusCode, String)> {
        let parsed = value.parse::<i32>().map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                format!("field '{name}' must be an integer"),
            )
        })?;
        *target = Some(parsed);
        Ok(())
    };
    match name {
        "food_description" => body.food_description = Some(value.to_string()),
        "calories" => int(&mut body.calories)?,
        "protein_g" => int(&mut body.protein_g)?,
        "fat_g" => int(&mut body.fat_g)?,
        "carbs_g" => int(&mut body.carbs_g)?,
        "fiber_g" => int(&mut body.fiber_g)?,
        "sugar_g" => int(&mut body.sugar_g)?,
        "sodium_mg" => int(&mut body.sodium_mg)?,
        "meal_type" => body.meal_type = Some(value.to_string()),
        "consumed_at" => body.consumed_at = Some(value.to_string()),
        "notes" => body.notes = Some(value.to_string()),
        other => warn!(field = other, "ignoring unknown multipart field"),
    }
    Ok(())
}

fn image_key(user_id: Uuid, mime: &str) -> String {
    let ext = ext_from_mime(mime).unwrap_or("bin");
    format!("meals/{}/{}.{}", user_id, Uuid::new_v4(), ext)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

/// Folds (instant, calories) rows into per-day totals, days keyed by the
/// UTC calendar date.
fn daily_totals(rows: &[(OffsetDateTime, i32)]) -> Vec<DailySummary> {
    let mut days: BTreeMap<time::Date, (i64, i64)> = BTreeMap::new();
    for (at, calories) in rows {
        let day = at.to_offset(time::UtcOffset::UTC).date();
        let entry = days.entry(day).or_insert((0, 0));
        entry.0 += i64::from(*calories);
        entry.1 += 1;
    }
    days.into_iter()
        .map(|(date, (total_calories, meals))| DailySummary {
            date: date.to_string(),
            total_calories,
            meals,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn ext_from_mime_known_and_unknown() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn image_keys_are_scoped_per_user() {
        let user = Uuid::new_v4();
        let key = image_key(user, "image/webp");
        assert!(key.starts_with(&format!("meals/{}/", user)));
        assert!(key.ends_with(".webp"));
    }

    #[test]
    fn daily_totals_groups_by_utc_day() {
        let rows = vec![
            (datetime!(2024-01-05 08:00:00 UTC), 300),
            (datetime!(2024-01-05 19:00:00 UTC), 700),
            // 23:30 -05:00 is already Jan 7 in UTC
            (datetime!(2024-01-06 23:30:00 -5), 450),
        ];
        let days = daily_totals(&rows);
        assert_eq!(
            days,
            vec![
                DailySummary {
                    date: "2024-01-05".into(),
                    total_calories: 1000,
                    meals: 2
                },
                DailySummary {
                    date: "2024-01-07".into(),
                    total_calories: 450,
                    meals: 1
                },
            ]
        );
    }

    #[test]
    fn override_fields_parse_or_reject() {
        let mut body = OverrideBody::default();
        apply_override_field(&mut body, "calories", "450").unwrap();
        assert_eq!(body.calories, Some(450));

        apply_override_field(&mut body, "notes", "tasty").unwrap();
        assert_eq!(body.notes.as_deref(), Some("tasty"));

        // blank values are treated as absent, not zero
        apply_override_field(&mut body, "protein_g", "  ").unwrap();
        assert_eq!(body.protein_g, None);

        let err = apply_override_field(&mut body, "fat_g", "lots").unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn truncated_multipart_body_is_a_bad_request() {
        use axum::body::Body;
        use axum::extract::FromRef;
        use axum::http::{header, Request};
        use tower::ServiceExt;

        let state = crate::state::AppState::fake();
        let token = crate::auth::jwt::JwtKeys::from_ref(&state)
            .sign_access(Uuid::new_v4())
            .unwrap();
        let app = write_routes().with_state(state);

        // a part begins but the body ends before the closing boundary
        let body = "--BOUND\r\nContent-Disposition: form-data; name=\"calories\"\r\n\r\n450\r\n";
        let response = app
            .oneshot(
                Request::post("/meals")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .header(
                        header::CONTENT_TYPE,
                        "multipart/form-data; boundary=BOUND",
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn respond_presigns_stored_images() {
        let state = crate::state::AppState::fake();
        let row = MealRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            food_description: "toast".into(),
            calories: 120,
            protein_g: 4,
            fat_g: 2,
            carbs_g: 22,
            fiber_g: 1,
            sugar_g: 2,
            sodium_mg: 150,
            meal_type: "breakfast".into(),
            consumed_at: datetime!(2024-01-05 08:00:00 UTC),
            notes: None,
            source: "image".into(),
            image_key: Some("meals/u/p.jpg".into()),
            image_mime: Some("image/jpeg".into()),
            created_at: datetime!(2024-01-05 08:01:00 UTC),
        };
        let resp = respond(&state, row.clone()).await;
        assert_eq!(resp.image_url.as_deref(), Some("https://fake.local/meals/u/p.jpg"));

        let mut no_image = row;
        no_image.image_key = None;
        let resp = respond(&state, no_image).await;
        assert_eq!(resp.image_url, None);
    }
}
