//! Rule management endpoints.

use actix_web::{web, HttpResponse};

use rls_core::rule::Rule;
use rls_infra::rules::StoreError;
use rls_shared::dto::RuleAck;
use rls_shared::response::ErrorResponse;

use crate::state::AppState;

/// POST /v1/rules
pub async fn create_rule(state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let rule: Rule = match serde_json::from_slice(&body) {
        Ok(rule) => rule,
        Err(e) => {
            return HttpResponse::BadRequest().json(ErrorResponse::bad_request(e.to_string()))
        }
    };
    let rule_id = rule.rule_id.clone();
    match state.store.upsert(rule).await {
        Ok(()) => HttpResponse::Created().json(RuleAck::ok(rule_id)),
        Err(e) => upsert_error(e, &rule_id),
    }
}

/// PUT /v1/rules/{id} - the path id wins over any id in the body.
pub async fn update_rule(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let rule_id = path.into_inner();
    let mut rule: Rule = match serde_json::from_slice(&body) {
        Ok(rule) => rule,
        Err(e) => {
            return HttpResponse::BadRequest().json(ErrorResponse::bad_request(e.to_string()))
        }
    };
    rule.rule_id = rule_id.clone();
    match state.store.upsert(rule).await {
        Ok(()) => HttpResponse::Ok().json(RuleAck::ok(rule_id)),
        Err(e) => upsert_error(e, &rule_id),
    }
}

/// GET /v1/rules/{id}
pub async fn get_rule(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let rule_id = path.into_inner();
    match state.store.get(&rule_id) {
        Some(rule) => HttpResponse::Ok().json(rule),
        None => HttpResponse::NotFound().json(ErrorResponse::not_found(&rule_id)),
    }
}

fn upsert_error(err: StoreError, rule_id: &str) -> HttpResponse {
    match err {
        StoreError::Invalid(e) => {
            HttpResponse::BadRequest().json(ErrorResponse::bad_request(e.to_string()))
        }
        other => {
            tracing::error!(rule_id, error = %other, "rule upsert failed");
            HttpResponse::InternalServerError()
                .json(ErrorResponse::internal(other.to_string()).with_rule_id(rule_id))
        }
    }
}
