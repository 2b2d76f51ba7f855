//! API route handlers.

mod allow;
mod health;
mod rules;

use actix_web::web;

/// Configure all API routes.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::health_check))
        .service(
            web::scope("/v1")
                .route("/allow", web::post().to(allow::allow))
                .route("/check", web::post().to(allow::check))
                .route("/rules", web::post().to(rules::create_rule))
                .route("/rules/{id}", web::get().to(rules::get_rule))
                .route("/rules/{id}", web::put().to(rules::update_rule)),
        );
}
