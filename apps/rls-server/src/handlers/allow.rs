//! Decision endpoints: single-rule `/v1/allow` and matched-path
//! `/v1/check`.

use std::collections::HashMap;

use actix_web::http::header::RETRY_AFTER;
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder};
use chrono::Utc;

use rls_core::decision::Decision;
use rls_core::identity::{
    self, resolve_client, API_KEY_HEADER, FORWARDED_FOR_HEADER, USER_HEADER,
};
use rls_core::router::RequestCtx;
use rls_core::rule::Rule;
use rls_shared::dto::{AllowRequest, AllowResponse, CheckRequest};
use rls_shared::response::{rate_limit_code, ErrorResponse};

use crate::state::AppState;

/// POST /v1/allow - evaluate one rule by id.
pub async fn allow(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let parsed: AllowRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return HttpResponse::BadRequest().json(ErrorResponse::bad_request(e.to_string()))
        }
    };
    if parsed.rule_id.is_empty() {
        return HttpResponse::BadRequest()
            .json(ErrorResponse::bad_request("ruleId is required"));
    }

    let mut dims = parsed.dims;
    enrich_dims(&mut dims, &req, req.path());

    let Some(rule) = state.store.get(&parsed.rule_id) else {
        return HttpResponse::NotFound().json(ErrorResponse::not_found(&parsed.rule_id));
    };
    if !rule.enabled {
        return HttpResponse::Forbidden().json(ErrorResponse::forbidden(&parsed.rule_id));
    }

    let decision = state
        .engine
        .allow_rules(std::slice::from_ref(&rule), &dims, Utc::now())
        .await;
    render_decision(decision, Some(&rule))
}

/// POST /v1/check - resolve identity, match rules by path/method, evaluate
/// in priority order.
pub async fn check(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let parsed: CheckRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return HttpResponse::BadRequest().json(ErrorResponse::bad_request(e.to_string()))
        }
    };
    if parsed.path.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::bad_request("path is required"));
    }

    let client = resolve_client(
        header(&req, USER_HEADER).as_deref(),
        header(&req, API_KEY_HEADER).as_deref(),
        header(&req, FORWARDED_FOR_HEADER).as_deref(),
        req.peer_addr().map(|a| a.to_string()).as_deref(),
    );

    let mut dims = parsed.dims;
    enrich_dims(&mut dims, &req, &parsed.path);
    if let Some(client) = &client {
        dims.entry(client.kind.as_str().to_string())
            .or_insert_with(|| client.id.clone());
    }

    let method = if parsed.method.is_empty() {
        req.method().to_string()
    } else {
        parsed.method
    };
    let ctx = RequestCtx {
        path: parsed.path,
        method,
        client_kind: client
            .map(|c| c.kind.as_str().to_string())
            .unwrap_or_default(),
    };

    let decision = state.engine.allow_request(&ctx, &dims, Utc::now()).await;
    render_decision(decision, None)
}

/// Fill `ip` and `route` when the caller did not provide them.
fn enrich_dims(dims: &mut HashMap<String, String>, req: &HttpRequest, route: &str) {
    if !dims.contains_key("ip") {
        let forwarded = header(req, FORWARDED_FOR_HEADER)
            .as_deref()
            .and_then(identity::first_forwarded_ip);
        let ip = forwarded.or_else(|| {
            req.peer_addr()
                .map(|addr| identity::strip_port(&addr.to_string()))
        });
        if let Some(ip) = ip.filter(|ip| !ip.is_empty()) {
            dims.insert("ip".to_string(), ip);
        }
    }
    if !dims.contains_key("route") {
        dims.insert("route".to_string(), route.to_string());
    }
}

fn header(req: &HttpRequest, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn render_decision(decision: Decision, rule: Option<&Rule>) -> HttpResponse {
    if decision.allowed {
        let mut builder = HttpResponse::Ok();
        set_rate_limit_headers(&mut builder, &decision, rule, 0);
        return builder.json(AllowResponse {
            allowed: true,
            remaining: decision.remaining,
            retry_after_ms: decision.retry_after_ms,
            reason: decision.reason,
        });
    }

    let retry_after_secs = retry_after_seconds(decision.retry_after_ms);
    let mut builder = HttpResponse::TooManyRequests();
    set_rate_limit_headers(&mut builder, &decision, rule, retry_after_secs);
    if retry_after_secs > 0 {
        builder.insert_header((RETRY_AFTER, retry_after_secs.to_string()));
    }

    let mut envelope = ErrorResponse::new(rate_limit_code(&decision.reason), "Too Many Requests")
        .with_reason(decision.reason.clone())
        .with_retry_after(retry_after_secs);
    if let Some(rule) = rule {
        envelope = envelope.with_rule_id(&rule.rule_id);
    }
    builder.json(envelope)
}

fn set_rate_limit_headers(
    builder: &mut HttpResponseBuilder,
    decision: &Decision,
    rule: Option<&Rule>,
    retry_after_secs: i64,
) {
    if decision.remaining >= 0 {
        builder.insert_header(("X-RateLimit-Remaining", decision.remaining.to_string()));
    }
    if let Some(rule) = rule {
        if rule.limit > 0 {
            builder.insert_header(("X-RateLimit-Limit", rule.limit.to_string()));
        }
        if !rule.rule_id.is_empty() {
            builder.insert_header(("X-RateLimit-Rule", rule.rule_id.clone()));
        }
    }
    if retry_after_secs > 0 {
        let reset = Utc::now().timestamp() + retry_after_secs;
        builder.insert_header(("X-RateLimit-Reset", reset.to_string()));
    }
}

/// Denials always advertise at least one second of backoff.
fn retry_after_seconds(retry_after_ms: i64) -> i64 {
    if retry_after_ms <= 0 {
        return 1;
    }
    (retry_after_ms + 999) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_seconds(0), 1);
        assert_eq!(retry_after_seconds(-5), 1);
        assert_eq!(retry_after_seconds(1), 1);
        assert_eq!(retry_after_seconds(1000), 1);
        assert_eq!(retry_after_seconds(1001), 2);
        assert_eq!(retry_after_seconds(60_000), 60);
    }
}
