use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::capture::filter::Predicate;
use crate::models::filter::FilterColumn;

/// Filter validation request
#[derive(Deserialize)]
pub struct ValidateFilterRequest {
    filter: String,
}

/// Result of compiling a filter
#[derive(Serialize)]
struct ValidateFilterResponse {
    valid: bool,
    /// Compile error, if any
    error: Option<String>,
    /// Columns referenced by the filter, in clause order
    columns: Vec<&'static str>,
}

/// Compile a filter and report whether it is usable
pub async fn validate_filter(request: web::Json<ValidateFilterRequest>) -> impl Responder {
    let response = match Predicate::compile(&request.filter) {
        Ok(predicate) => ValidateFilterResponse {
            valid: true,
            error: None,
            columns: predicate
                .map(|p| p.clauses().iter().map(|c| c.column.name()).collect())
                .unwrap_or_default(),
        },
        Err(e) => ValidateFilterResponse {
            valid: false,
            error: Some(e.to_string()),
            columns: Vec::new(),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Columns a filter can reference
pub async fn list_columns() -> impl Responder {
    let columns: Vec<&'static str> = FilterColumn::ALL.iter().map(|c| c.name()).collect();
    HttpResponse::Ok().json(columns)
}
