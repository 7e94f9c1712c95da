use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::db::{Database, Grade, GradeInput};

use super::{error::ApiError, AppState};

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    let id: i64 = raw
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid grade ID".to_string()))?;

    if id < 0 {
        return Err(ApiError::BadRequest(
            "ID must be a positive number".to_string(),
        ));
    }

    Ok(id)
}

fn parse_body(payload: Result<Json<GradeInput>, JsonRejection>) -> Result<GradeInput, ApiError> {
    payload
        .map(|Json(input)| input)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

async fn find<D: Database>(state: &AppState<D>, raw_id: &str) -> Result<Grade, ApiError> {
    let id = parse_id(raw_id)?;
    state.db.get_grade(id).await?.ok_or(ApiError::NotFound)
}

pub async fn list_grades<D: Database>(
    State(state): State<AppState<D>>,
) -> Result<Json<Vec<Grade>>, ApiError> {
    let _timer = state.metrics.timer("api", "get_grades");
    let grades = state.db.list_grades().await?;
    Ok(Json(grades))
}

pub async fn get_grade<D: Database>(
    State(state): State<AppState<D>>,
    Path(id): Path<String>,
) -> Result<Json<Grade>, ApiError> {
    let _timer = state.metrics.timer("api", "get_grades_id");
    let grade = find(&state, &id).await?;
    Ok(Json(grade))
}

pub async fn create_grade<D: Database>(
    State(state): State<AppState<D>>,
    payload: Result<Json<GradeInput>, JsonRejection>,
) -> Result<(StatusCode, Json<Grade>), ApiError> {
    let _timer = state.metrics.timer("api", "post_grades");
    let input = parse_body(payload)?;
    let grade = state.db.create_grade(input).await?;
    Ok((StatusCode::CREATED, Json(grade)))
}

pub async fn update_grade<D: Database>(
    State(state): State<AppState<D>>,
    Path(id): Path<String>,
    payload: Result<Json<GradeInput>, JsonRejection>,
) -> Result<Json<Grade>, ApiError> {
    let _timer = state.metrics.timer("api", "put_grades_id");
    let mut grade = find(&state, &id).await?;
    let input = parse_body(payload)?;

    grade.apply(input);
    state.db.update_grade(&grade).await?;

    Ok(Json(grade))
}

pub async fn delete_grade<D: Database>(
    State(state): State<AppState<D>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let _timer = state.metrics.timer("api", "delete_grades_id");
    let grade = find(&state, &id).await?;
    state.db.delete_grade(grade.id).await?;

    Ok(Json(json!({ "message": "Grade deleted" })))
}

pub async fn average_grade<D: Database>(
    State(state): State<AppState<D>>,
) -> Result<Json<Value>, ApiError> {
    let _timer = state.metrics.timer("api", "get_grades_avg");
    let average = state.db.average_grade().await?;
    Ok(Json(json!({ "average": average })))
}
