mod rest_api;

use actix_cors::Cors;
use actix_web::{http::header, middleware::Logger, web, App, HttpServer};
use deadpool_postgres::{Config, ManagerConfig, RecyclingMethod, Runtime};
use dotenv::var;
use tokio_postgres::NoTls;
use utoipa::OpenApi;
use utoipa_redoc::{Redoc, Servable};

#[derive(OpenApi)]
#[openapi(
    paths(rest_api::fields, rest_api::screener::screener, rest_api::company::company),
    components(schemas(
        rest_api::screener::ScreenerRequest,
        rest_api::screener::ScreenerFilter,
        rest_api::screener::ScreenerResponse,
        rest_api::screener::ScreenerCompany,
        rest_api::company::CompanyResponse,
        rest_api::company::StatementFinancials,
    ))
)]
struct ApiDoc;

/// Comma separated `CORS_ORIGINS`; empty means every origin.
fn cors_origins(raw: Option<String>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn cors(origins: &[String]) -> Cors {
    if origins.is_empty() {
        return Cors::permissive();
    }
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    // build pool from .env FUNDUMP_URL
    let db_url = var("FUNDUMP_URL").map_err(|err| {
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("FUNDUMP_URL: {err}"))
    })?;
    let mut cfg = Config::new();
    cfg.url = Some(db_url);
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;

    let addr = var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = match var("SERVER_PORT") {
        Ok(port) => port.parse::<u16>().map_err(|err| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("SERVER_PORT: {err}"))
        })?,
        Err(_) => 11234,
    };
    let origins = cors_origins(var("CORS_ORIGINS").ok());
    match origins.is_empty() {
        true => log::info!("serving fundump on {addr}:{port}, any origin"),
        false => log::info!("serving fundump on {addr}:{port}, origins {origins:?}"),
    }

    // run server
    HttpServer::new(move || {
        App::new()
            .wrap(cors(&origins))
            .wrap(Logger::default())
            .app_data(web::Data::new(pool.clone()))
            .service(rest_api::fields)
            .service(rest_api::screener::screener)
            .service(rest_api::company::company)
            .service(Redoc::with_url("/redoc", ApiDoc::openapi()))
    })
    .bind((addr.as_str(), port))?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;

    #[::core::prelude::v1::test]
    fn origins_from_env() {
        assert!(cors_origins(None).is_empty());
        assert!(cors_origins(Some(" ".to_string())).is_empty());
        assert_eq!(
            cors_origins(Some("http://localhost:3000, https://fundump.app".to_string())),
            vec!["http://localhost:3000", "https://fundump.app"]
        );
    }

    #[actix_web::test]
    async fn any_origin_by_default() {
        let app = test::init_service(App::new().wrap(cors(&[])).service(rest_api::fields)).await;
        let req = test::TestRequest::get()
            .uri("/fields")
            .insert_header((header::ORIGIN, "http://localhost:3000"))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert!(resp
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[actix_web::test]
    async fn configured_origin_passes_preflight() {
        let origins = vec!["http://localhost:3000".to_string()];
        let app = test::init_service(App::new().wrap(cors(&origins)).service(rest_api::fields)).await;
        let req = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/fields")
            .insert_header((header::ORIGIN, "http://localhost:3000"))
            .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "GET"))
            .to_request();

        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
    }
}
