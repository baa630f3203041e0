use std::sync::Arc;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use rust_xlsxwriter::Workbook;
use serde_json::{json, Value};
use sheet_insights::{config::Config, routes, AppState};
use tower::ServiceExt;

const BOUNDARY: &str = "sheet-insights-test-boundary";
const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

fn app() -> Router {
    let state = AppState::from_config(Config::default()).unwrap();
    routes::app(Arc::new(state))
}

fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(routes::PRINCIPAL_HEADER, user);
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn upload_request(user: &str, file_name: &str, content_type: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/datasets")
        .header(routes::PRINCIPAL_HEADER, user)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn regional_workbook() -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Region").unwrap();
    sheet.write_string(0, 1, "Units").unwrap();
    for (i, (region, units)) in [("North", 4.0), ("South", 9.0), ("North", 6.0)].iter().enumerate() {
        sheet.write_string(i as u32 + 1, 0, *region).unwrap();
        sheet.write_number(i as u32 + 1, 1, *units).unwrap();
    }
    workbook.save_to_buffer().unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_needs_no_principal() {
    let (status, body) = send(&app(), request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn dashboard_requires_principal() {
    let (status, body) = send_json(&app(), request("GET", "/dashboard", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("x-user-id"));
}

#[tokio::test]
async fn fresh_principal_sees_sample_dataset() {
    let (status, body) = send_json(&app(), request("GET", "/dashboard", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dataset"]["name"], "Sample Dataset");
    assert_eq!(body["columns"], json!(["Quarter", "Sales", "Profit", "Region"]));
    assert_eq!(body["numericColumns"], json!(["Sales", "Profit"]));
    assert_eq!(body["selection"]["xField"], "Quarter");
    assert_eq!(body["chart"]["status"], "incomplete_selection");
    assert_eq!(body["filterFieldStale"], false);
}

#[tokio::test]
async fn selection_and_filter_drive_the_chart() {
    let app = app();
    let (status, _) = send_json(
        &app,
        request(
            "PATCH",
            "/dashboard/selection",
            Some("alice"),
            Some(json!({ "chartType": "bar", "yFields": ["Sales", "Nope"] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(
        &app,
        request(
            "PUT",
            "/dashboard/filter",
            Some("alice"),
            Some(json!({ "filterField": "Region", "filterValue": "West" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["selection"]["yFields"], json!(["Sales"]));
    assert_eq!(body["basicInsights"]["rowCount"], 1);

    let (_, chart) = send_json(&app, request("GET", "/dashboard/chart", Some("alice"), None)).await;
    assert_eq!(chart["status"], "ready");
    assert_eq!(chart["chart"]["kind"], "cartesian");
    assert_eq!(chart["chart"]["categories"], json!(["Q2"]));
    assert_eq!(chart["chart"]["series"][0]["values"], json!([180.0]));

    let (_, other) = send_json(&app, request("GET", "/dashboard", Some("bob"), None)).await;
    assert_eq!(other["basicInsights"]["rowCount"], 4);
}

#[tokio::test]
async fn filter_values_are_sorted_and_distinct() {
    let (status, body) = send_json(
        &app(),
        request("GET", "/dashboard/filter-values?field=Region", Some("alice"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["values"], json!(["East", "North", "South", "West"]));
}

#[tokio::test]
async fn upload_replaces_dataset_and_lands_in_history() {
    let app = app();
    let (status, body) = send_json(
        &app,
        upload_request("alice", "regions.xlsx", XLSX, &regional_workbook()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["dataset"]["name"], "regions");
    assert_eq!(body["dataset"]["rowCount"], 3);
    assert_eq!(body["selection"]["xField"], "Region");

    let (_, history) = send_json(&app, request("GET", "/history", Some("alice"), None)).await;
    assert_eq!(history[0]["fileName"], "regions.xlsx");
    assert_eq!(history[0]["rows"], 3);

    let (_, files) = send_json(&app, request("GET", "/datasets", Some("alice"), None)).await;
    let id = files[0]["id"].as_i64().unwrap();

    let (status, stored) = send_json(
        &app,
        request("GET", &format!("/datasets/{}", id), Some("alice"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["columns"], json!(["Region", "Units"]));
    assert_eq!(stored["rows"][1]["Units"], 9.0);

    let (status, _) = send_json(
        &app,
        request("GET", &format!("/datasets/{}", id), Some("bob"), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_upload_type_is_415() {
    let app = app();
    let (status, body) = send_json(
        &app,
        upload_request("alice", "notes.csv", "text/csv", b"a,b\n1,2\n"),
    )
    .await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(body["error"].as_str().unwrap().contains("text/csv"));

    let (_, dashboard) = send_json(&app, request("GET", "/dashboard", Some("alice"), None)).await;
    assert_eq!(dashboard["dataset"]["name"], "Sample Dataset");
}

#[tokio::test]
async fn corrupt_workbook_is_400() {
    let (status, _) = send_json(
        &app(),
        upload_request("alice", "broken.xlsx", XLSX, b"not a zip archive"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn history_entries_can_be_deleted() {
    let app = app();
    send_json(&app, upload_request("alice", "one.xlsx", XLSX, &regional_workbook())).await;
    send_json(&app, upload_request("alice", "two.xlsx", XLSX, &regional_workbook())).await;

    let (status, removed) = send_json(&app, request("DELETE", "/history/1", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed["fileName"], "one.xlsx");

    let (_, history) = send_json(&app, request("GET", "/history", Some("alice"), None)).await;
    assert_eq!(history.as_array().unwrap().len(), 1);

    let (status, _) = send_json(&app, request("DELETE", "/history/7", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reset_returns_to_sample() {
    let app = app();
    send_json(&app, upload_request("alice", "one.xlsx", XLSX, &regional_workbook())).await;

    let (status, body) = send_json(&app, request("POST", "/dashboard/reset", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dataset"]["name"], "Sample Dataset");

    let (_, history) = send_json(&app, request("GET", "/history", Some("alice"), None)).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn latest_dataset_is_404_before_any_upload() {
    let (status, _) = send_json(&app(), request("GET", "/datasets/latest", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn report_exports_text_and_pages() {
    let app = app();
    let (status, body) = send(&app, request("GET", "/insights/report.txt", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).unwrap();
    assert!(text.starts_with("Dataset Insights\n"));
    assert!(text.contains("Column: Sales\nType: numeric\nUnique Values: 4\n"));

    let (status, pages) = send_json(&app, request("GET", "/insights/report/pages", Some("alice"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pages["title"], "Dataset Insights");
    let count = pages["pageCount"].as_u64().unwrap();
    assert_eq!(pages["pages"][0]["footer"], format!("Page 1 of {}", count));
}
