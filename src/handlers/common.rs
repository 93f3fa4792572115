use axum::{
    extract::Multipart,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::debug;
use utoipa::ToSchema;

use crate::{errors::ServiceError, services::csv_import::CsvUpload, ApiResponse};

/// Multipart field carrying the CSV file
pub const CSV_FIELD: &str = "csv_file";

pub const IMPORT_SUCCESS_MESSAGE: &str = "Data from CSV was imported";

/// Acknowledgment body of a successful import
#[derive(Debug, Serialize, ToSchema)]
pub struct ImportSummary {
    pub created: usize,
}

/// `charset` parameter of a `Content-Type` value, if any.
pub fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Pulls the `csv_file` part out of a multipart form. The part's own charset
/// wins over the one on the request.
pub async fn read_csv_upload(
    headers: &HeaderMap,
    mut multipart: Multipart,
) -> Result<CsvUpload, ServiceError> {
    let request_charset = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(charset_param);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some(CSV_FIELD) {
            continue;
        }
        let charset = field
            .content_type()
            .and_then(charset_param)
            .or_else(|| request_charset.clone());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServiceError::BadRequest(format!("Failed to read upload: {}", e)))?;
        debug!(bytes = bytes.len(), charset = ?charset, "Received CSV upload");
        return Ok(CsvUpload::new(bytes.to_vec(), charset));
    }

    Err(ServiceError::ImportRejected(vec![format!(
        "{}: this field is required",
        CSV_FIELD
    )]))
}

/// `303 See Other` back to the listing, with a JSON acknowledgment.
pub fn imported_response(location: &'static str, created: usize) -> Response {
    let body = ApiResponse::success(ImportSummary { created }).with_message(IMPORT_SUCCESS_MESSAGE);

    let mut response = (StatusCode::SEE_OTHER, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::LOCATION, HeaderValue::from_static(location));
    response
}
