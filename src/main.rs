use actix_session::storage::CookieSessionStore;
use actix_session::SessionMiddleware;
use actix_web::cookie::Key;
use actix_web::middleware::{NormalizePath, TrailingSlash};
use actix_web::{web::Data, App, HttpServer};
use anyhow::Context as AnyhowContext;
use catalog_admin::{
    access::{self, AccessPolicy},
    cache::{backend_from_kind, SafeCache},
    catalog_api::{Connector, HttpConnector},
    config::{self, Settings},
    control, import,
};
use std::env;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    let env_path = config::load_env_file()?;
    let settings = Settings::from_env()?;
    let secret_key = Key::from(config::session_key(env_path)?.as_bytes());

    let connector: Arc<dyn Connector> = Arc::new(HttpConnector::new(
        &settings.api_url,
        settings.api_timeout,
        settings.api_retries,
    )?);
    let cache = SafeCache::new(backend_from_kind(
        settings.cache_backend,
        settings.cache_capacity,
    ));
    let policy: Arc<dyn AccessPolicy> = access::policy_from_name(&settings.access_policy);
    log::info!(
        "Using catalog API at {} ({:?} cache, {} policy)",
        settings.api_url,
        settings.cache_backend,
        settings.access_policy
    );

    let addr = (settings.bind_addr.clone(), settings.port);
    let bind_error = format!(
        "Failed to bind server to {}:{}. Is the port already in use?",
        addr.0, addr.1
    );
    HttpServer::new(move || {
        App::new()
            .app_data(control::form_config())
            .app_data(import::controllers::upload_config())
            .app_data(Data::from(connector.clone()))
            .app_data(Data::from(policy.clone()))
            .app_data(Data::new(cache.clone()))
            .app_data(Data::new(settings.clone()))
            .wrap(control::StaffGuard)
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), secret_key.clone())
                    .cookie_secure(false)
                    .build(),
            )
            .wrap(NormalizePath::new(TrailingSlash::Trim))
            .service(actix_files::Files::new("/static", "static"))
            .configure(control::configure)
    })
    .bind(addr)
    .context(bind_error)?
    .run()
    .await?;
    Ok(())
}
