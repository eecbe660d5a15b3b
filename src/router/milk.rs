//! Daily milk record routes.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Extension, Json, Router, middleware};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::record::{BulkReport, MilkRecord, RECORD_NOT_FOUND, RecordInput, RecordPage};
use crate::stats::{MonthlyBreakdown, PageRequest};
use crate::user::User;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkBody {
    #[serde(default)]
    pub records: Vec<RecordInput>,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub message: &'static str,
    pub record: MilkRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayResponse {
    pub record: MilkRecord,
    pub is_new: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedResponse {
    pub message: &'static str,
    pub deleted_record: MilkRecord,
}

#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: BulkReport,
}

/// Lenient integer parsing: junk falls back to the default page.
fn number(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.trim().parse().ok())
}

/// Ids that are not UUIDs name no record.
fn record_id(path: std::result::Result<Path<Uuid>, PathRejection>) -> Result<Uuid> {
    path.map(|Path(id)| id)
        .map_err(|_| ServerError::NotFound(RECORD_NOT_FOUND))
}

/// `201` for a new day, `200` when the day already had a record. The
/// quantity is mandatory here.
pub async fn add(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    payload: std::result::Result<Json<RecordInput>, JsonRejection>,
) -> Result<(StatusCode, Json<RecordResponse>)> {
    let Json(input) = payload?;
    let check = input.check_entry(state.clock.today());
    if !check.is_valid() {
        return Err(ServerError::invalid("Invalid milk record.", check.errors));
    }
    let upserted = state.records.upsert(user.id, input).await?;

    let (status, message) = if upserted.created {
        (StatusCode::CREATED, "Milk record created successfully")
    } else {
        (StatusCode::OK, "Milk record updated successfully")
    };

    Ok((
        status,
        Json(RecordResponse {
            message,
            record: upserted.record,
        }),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListQuery>,
) -> Result<Json<RecordPage>> {
    let range = super::date_range(query.start_date.as_deref(), query.end_date.as_deref())?;
    let page = PageRequest::new(number(query.page.as_deref()), number(query.limit.as_deref()));

    Ok(Json(state.records.list(user.id, range, page).await?))
}

pub async fn today(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<TodayResponse>> {
    let (record, is_new) = state.records.today(user.id).await?;

    Ok(Json(TodayResponse {
        record,
        is_new,
        message: is_new.then_some("Today's record auto-marked as received"),
    }))
}

pub async fn confirm(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<RecordResponse>> {
    let record = state.records.confirm(user.id, record_id(id)?).await?;

    Ok(Json(RecordResponse {
        message: "Record confirmed successfully",
        record,
    }))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<DeletedResponse>> {
    let deleted_record = state.records.delete(user.id, record_id(id)?).await?;

    Ok(Json(DeletedResponse {
        message: "Record deleted successfully",
        deleted_record,
    }))
}

pub async fn monthly_stats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    path: std::result::Result<Path<(i32, u32)>, PathRejection>,
) -> Result<Json<MonthlyBreakdown>> {
    let Path((year, month)) = path.map_err(|_| {
        ServerError::invalid(
            "Invalid month.",
            vec!["Year and month must be numbers".to_owned()],
        )
    })?;
    Ok(Json(state.records.monthly(user.id, year, month).await?))
}

/// `201` when every entry was created, `207` when some days were taken.
pub async fn bulk_create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    payload: std::result::Result<Json<BulkBody>, JsonRejection>,
) -> Result<(StatusCode, Json<BulkResponse>)> {
    let Json(body) = payload?;
    let report = state.records.bulk_create(user.id, body.records).await?;

    let status = if report.is_partial() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::CREATED
    };

    Ok((
        status,
        Json(BulkResponse {
            message: format!(
                "Created {} of {} records",
                report.created_records, report.total_requested
            ),
            report,
        }),
    ))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/add", post(add))
        .route("/get", get(list))
        .route("/today", get(today))
        .route("/confirm/{id}", put(confirm))
        .route("/{id}", delete(remove))
        .route("/monthly-stats/{year}/{month}", get(monthly_stats))
        .route("/bulk-create", post(bulk_create))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::authenticate,
        ))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};

    use crate::*;

    async fn body(response: axum::http::Response<axum::body::Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// App with one signed up user and their token.
    async fn setup() -> (axum::Router, String) {
        let state = router::state();
        let (_, token) = state
            .users
            .signup("milkman", "9876543210", "secret")
            .await
            .unwrap();
        (app(state), token)
    }

    #[tokio::test]
    async fn test_add_creates_then_updates() {
        let (app, token) = setup().await;

        let response = make_request(
            Some(token.as_str()),
            app.clone(),
            Method::POST,
            "/api/milk/add",
            json!({"date": "2024-03-10", "liters": 2, "status": "partial"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body(response).await;
        assert_eq!(created["record"]["liters"], 2.0);
        assert_eq!(created["record"]["isAutoMarked"], false);

        let response = make_request(
            Some(token.as_str()),
            app,
            Method::POST,
            "/api/milk/add",
            json!({"date": "2024-03-10", "liters": "1.5", "notes": "late"}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let updated = body(response).await;
        assert_eq!(updated["record"]["id"], created["record"]["id"]);
        assert_eq!(updated["record"]["liters"], 1.5);
        assert_eq!(updated["record"]["status"], "partial");
        assert_eq!(updated["record"]["notes"], "late");
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_input() {
        let (app, token) = setup().await;

        let response = make_request(
            Some(token.as_str()),
            app,
            Method::POST,
            "/api/milk/add",
            json!({"date": "2026-01-01", "liters": 60}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let errors = body(response).await["errors"].clone();
        assert!(
            errors
                .as_array()
                .unwrap()
                .contains(&json!("Milk quantity cannot exceed 50 liters"))
        );
        assert!(
            errors
                .as_array()
                .unwrap()
                .contains(&json!("Date cannot be more than one year in the future"))
        );
    }

    #[tokio::test]
    async fn test_today_is_auto_marked_once() {
        let (app, token) = setup().await;

        let first = body(
            make_request(Some(token.as_str()), app.clone(), Method::GET, "/api/milk/today", String::new())
                .await,
        )
        .await;
        assert_eq!(first["isNew"], true);
        assert_eq!(first["record"]["date"], "2024-03-15");
        assert_eq!(first["record"]["liters"], 1.0);
        assert_eq!(first["record"]["status"], "received");
        assert_eq!(first["record"]["isAutoMarked"], true);

        let second = body(
            make_request(Some(token.as_str()), app.clone(), Method::GET, "/api/milk/today", String::new())
                .await,
        )
        .await;
        assert_eq!(second["isNew"], false);
        assert!(second.get("message").is_none());
        assert_eq!(second["record"]["id"], first["record"]["id"]);

        let id = first["record"]["id"].as_str().unwrap();
        let response = make_request(
            Some(token.as_str()),
            app,
            Method::PUT,
            &format!("/api/milk/confirm/{id}"),
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await["record"]["isAutoMarked"], false);
    }

    #[tokio::test]
    async fn test_delete_is_scoped_to_owner() {
        let state = router::state();
        let (_, token) = state
            .users
            .signup("milkman", "9876543210", "secret")
            .await
            .unwrap();
        let (_, other) = state
            .users
            .signup("neighbour", "1111111111", "secret")
            .await
            .unwrap();
        let app = app(state);

        let record = body(
            make_request(Some(token.as_str()), app.clone(), Method::GET, "/api/milk/today", String::new())
                .await,
        )
        .await["record"]
            .clone();
        let path = format!("/api/milk/{}", record["id"].as_str().unwrap());

        let response = make_request(Some(other.as_str()), app.clone(), Method::DELETE, &path, String::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = make_request(Some(token.as_str()), app.clone(), Method::DELETE, &path, String::new()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await["deletedRecord"]["id"], record["id"]);

        let response = make_request(Some(token.as_str()), app, Method::DELETE, &path, String::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_list_paginates_with_range_statistics() {
        let (app, token) = setup().await;
        for (day, liters) in [(1, 1.0), (2, 2.0), (3, 3.0)] {
            let response = make_request(
                Some(token.as_str()),
                app.clone(),
                Method::POST,
                "/api/milk/add",
                json!({"date": format!("2024-03-0{day}"), "liters": liters}).to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let page = body(
            make_request(
                Some(token.as_str()),
                app.clone(),
                Method::GET,
                "/api/milk/get?startDate=2024-03-01&endDate=2024-03-31&page=1&limit=2",
                String::new(),
            )
            .await,
        )
        .await;
        assert_eq!(page["records"].as_array().unwrap().len(), 2);
        assert_eq!(page["records"][0]["date"], "2024-03-03");
        assert_eq!(page["pagination"]["totalRecords"], 3);
        assert_eq!(page["pagination"]["totalPages"], 2);
        assert_eq!(page["pagination"]["hasNextPage"], true);
        assert_eq!(page["statistics"]["totalLiters"], 6.0);
        assert_eq!(page["statistics"]["averageLiters"], 2.0);

        let response = make_request(
            Some(token.as_str()),
            app,
            Method::GET,
            "/api/milk/get?startDate=yesterday",
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_monthly_stats() {
        let (app, token) = setup().await;
        make_request(
            Some(token.as_str()),
            app.clone(),
            Method::POST,
            "/api/milk/add",
            json!({"date": "2024-03-05", "liters": 2.5, "status": "received"}).to_string(),
        )
        .await;

        let stats = body(
            make_request(
                Some(token.as_str()),
                app.clone(),
                Method::GET,
                "/api/milk/monthly-stats/2024/3",
                String::new(),
            )
            .await,
        )
        .await;
        assert_eq!(stats["year"], 2024);
        assert_eq!(stats["month"], 3);
        assert_eq!(stats["monthlyOverview"]["totalLiters"], 2.5);
        assert_eq!(stats["monthlyOverview"]["receivedDays"], 1);
        assert_eq!(stats["dailyStats"][0]["day"], 5);

        let response = make_request(
            Some(token.as_str()),
            app.clone(),
            Method::GET,
            "/api/milk/monthly-stats/2024/13",
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        for (path, reason) in [
            ("/api/milk/monthly-stats/999999/3", "Year is out of range"),
            ("/api/milk/monthly-stats/2024/march", "Year and month must be numbers"),
        ] {
            let response =
                make_request(Some(token.as_str()), app.clone(), Method::GET, path, String::new()).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body(response).await["errors"][0], reason);
        }
    }

    #[tokio::test]
    async fn test_malformed_record_id_is_not_found() {
        let (app, token) = setup().await;

        for (method, path) in [
            (Method::PUT, "/api/milk/confirm/not-a-uuid"),
            (Method::DELETE, "/api/milk/12345"),
        ] {
            let response =
                make_request(Some(token.as_str()), app.clone(), method, path, String::new()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(body(response).await["detail"], "Record not found");
        }
    }

    #[tokio::test]
    async fn test_bulk_create_reports_conflicts() {
        let (app, token) = setup().await;
        make_request(
            Some(token.as_str()),
            app.clone(),
            Method::POST,
            "/api/milk/add",
            json!({"date": "2024-03-02", "liters": 1}).to_string(),
        )
        .await;

        let response = make_request(
            Some(token.as_str()),
            app.clone(),
            Method::POST,
            "/api/milk/bulk-create",
            json!({"records": [
                {"date": "2024-03-01", "liters": 1},
                {"date": "2024-03-02", "liters": 2},
            ]})
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::MULTI_STATUS);
        let report = body(response).await;
        assert_eq!(report["createdRecords"], 1);
        assert_eq!(report["totalRequested"], 2);
        assert_eq!(report["outcomes"][0]["outcome"], "created");
        assert_eq!(report["outcomes"][1]["outcome"], "conflicted");

        let response = make_request(
            Some(token.as_str()),
            app.clone(),
            Method::POST,
            "/api/milk/bulk-create",
            json!({"records": [{"date": "2024-03-04", "liters": 1}]}).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = make_request(
            Some(token.as_str()),
            app,
            Method::POST,
            "/api/milk/bulk-create",
            json!({"records": [
                {"date": "2024-03-05", "liters": 1},
                {"date": "2024-03-06", "liters": -1},
            ]})
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body(response).await["errors"][0]["index"], 1);
    }

    #[tokio::test]
    async fn test_records_need_token() {
        let (app, _) = setup().await;
        let response = make_request(None, app, Method::GET, "/api/milk/today", String::new()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
