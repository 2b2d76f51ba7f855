//! # RLS Server
//!
//! HTTP surface of the distributed rate-limiting service: wires the Redis
//! repository, rule store, limiters, IP list cache, and quota controller
//! into the decision engine, then serves the v1 API.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use tracing_actix_web::TracingLogger;

mod config;
mod handlers;
mod state;
mod telemetry;

use rls_core::engine::{Engine, FailPolicy};
use rls_core::ports::{IpListGate, Limiter, QuotaGate};
use rls_core::rule::Algorithm;
use rls_infra::iplist::{IpListCache, IpListConfig};
use rls_infra::limiter::{BreakerLimiter, LeakyBucket, LimiterMux, SlidingWindow, TokenBucket};
use rls_infra::quota::QuotaController;
use rls_infra::repo::RedisRepo;
use rls_infra::rules::{HttpRuleSource, Poller, RuleStore};

use config::AppConfig;
use state::AppState;

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_telemetry(&telemetry::TelemetryConfig::from_env());

    let config_path =
        std::env::var("RLS_CONFIG").unwrap_or_else(|_| "config/rls.yaml".to_string());
    let config = AppConfig::load(&config_path).map_err(into_io)?;

    let repo = Arc::new(
        RedisRepo::new(config.redis.to_redis_config())
            .await
            .map_err(into_io)?,
    );

    let store = RuleStore::new(Arc::clone(&repo));
    let mut background = Vec::new();

    if config.config_center.enabled() {
        let source = Arc::new(HttpRuleSource::new(config.config_center.clone()).map_err(into_io)?);
        let poller = Poller::new(
            source,
            Arc::clone(&store),
            config.config_center.poll_interval(),
            config.config_center.fail_policy,
        );
        if let Err(e) = poller.sync_once().await {
            if config.config_center.fail_policy == FailPolicy::FailClosed {
                return Err(into_io(e));
            }
            tracing::warn!(error = %e, "initial rule pull failed, serving last-good rules");
        }
        background.push(poller.spawn());
    } else {
        store
            .bootstrap(&config.bootstrap_rules)
            .await
            .map_err(into_io)?;
        background.push(store.spawn_watcher());
    }

    let limiter = breaker_wrapped_mux(&repo);
    let ip_cache = IpListCache::new(Arc::clone(&repo), IpListConfig::default());
    ip_cache.spawn_invalidation_watcher();
    let quota: Arc<dyn QuotaGate> = Arc::new(QuotaController::new(Arc::clone(&repo)));

    let engine = Arc::new(Engine::new(
        store.matcher(),
        limiter,
        Some(Arc::clone(&ip_cache) as Arc<dyn IpListGate>),
        Some(quota),
        config.features.fail_policy,
    ));

    let app_state = AppState {
        store: Arc::clone(&store),
        engine,
    };

    let http_addr = config.server.http_addr.clone();
    tracing::info!(addr = %http_addr, fail_policy = ?config.features.fail_policy, "starting rls server");

    let result = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(app_state.clone()))
            .configure(handlers::configure_routes)
    })
    .bind(http_addr.as_str())?
    .shutdown_timeout(5)
    .run()
    .await;

    for handle in background {
        handle.abort();
    }
    ip_cache.close();
    tracing::info!("rls server stopped");
    result
}

/// Each algorithm gets its own breaker-wrapped limiter behind one mux.
fn breaker_wrapped_mux(repo: &Arc<RedisRepo>) -> Arc<dyn Limiter> {
    let sliding: Arc<dyn Limiter> = Arc::new(BreakerLimiter::new(
        Arc::clone(repo),
        Arc::new(SlidingWindow::new(Arc::clone(repo))),
        "sliding_window",
    ));
    let token: Arc<dyn Limiter> = Arc::new(BreakerLimiter::new(
        Arc::clone(repo),
        Arc::new(TokenBucket::new(Arc::clone(repo))),
        "token_bucket",
    ));
    let leaky: Arc<dyn Limiter> = Arc::new(BreakerLimiter::new(
        Arc::clone(repo),
        Arc::new(LeakyBucket::new(Arc::clone(repo))),
        "leaky_bucket",
    ));

    Arc::new(LimiterMux::new(HashMap::from([
        (Algorithm::SlidingWindow, sliding),
        (Algorithm::TokenBucket, token),
        (Algorithm::LeakyBucket, leaky),
    ])))
}

fn into_io<E: std::fmt::Display>(err: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}
