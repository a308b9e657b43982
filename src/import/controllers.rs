use super::{list_import_files, load_bytes, load_file, supported_extension, DEFAULT_AGENT};
use crate::access::StaffUser;
use crate::catalog::CatalogService;
use crate::config::Settings;
use crate::control::{push_flash, render_template, see_other, take_flashes, Response, Staff, Toast};
use crate::human_size;
use crate::merge::{merge_catalog, MergeSummary};
use actix_multipart::form::{tempfile::TempFile, MultipartForm, MultipartFormConfig};
use actix_multipart::MultipartError;
use actix_session::Session;
use actix_web::{
    error::PayloadError,
    get,
    http::header::CONTENT_LENGTH,
    post,
    web::{Data, Form},
    HttpRequest, HttpResponse,
};
use askama::Template;
use catalog_api::{ApiError, BulkInsertRequest};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

/// Largest file the upload endpoint accepts.
pub const MAX_UPLOAD_SIZE: usize = 1024 * 1024;
/// Room for multipart boundaries and headers on top of the file itself.
const UPLOAD_OVERHEAD: usize = 64 * 1024;
const TOO_LARGE: &str = "File too large (max 1 MB)";

/// Multipart limits for the upload endpoint. Bodies past the limit are cut
/// off while streaming and answered with the too-large error.
pub fn upload_config() -> MultipartFormConfig {
    MultipartFormConfig::default().total_limit(MAX_UPLOAD_SIZE + UPLOAD_OVERHEAD)
}

fn is_oversized(req: &HttpRequest, err: &actix_web::Error) -> bool {
    let overflow = matches!(
        err.as_error::<MultipartError>(),
        Some(MultipartError::Payload(PayloadError::Overflow))
    );
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .is_some_and(|len| len > MAX_UPLOAD_SIZE + UPLOAD_OVERHEAD);
    overflow || declared
}

pub struct ImportFile {
    pub name: String,
    pub size: String,
}

#[derive(Template)]
#[template(path = "imports.html")]
struct ImportsPage {
    user: Option<StaffUser>,
    files: Vec<ImportFile>,
    flashes: Vec<Toast>,
}

fn agent(settings: Option<&Data<Settings>>) -> String {
    settings
        .map(|s| s.default_agent.clone())
        .unwrap_or_else(|| DEFAULT_AGENT.to_string())
}

#[get("/imports")]
pub async fn import_list(staff: Staff, session: Session, settings: Data<Settings>) -> Response {
    let files = list_import_files(&settings.import_files_dir)
        .into_iter()
        .map(|path| ImportFile {
            size: std::fs::metadata(&path)
                .map(|m| human_size(m.len()))
                .unwrap_or_default(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })
        .collect();
    render_template(ImportsPage {
        user: staff.page_user(),
        files,
        flashes: take_flashes(&session),
    })
}

#[derive(Deserialize)]
pub struct ImportFileDto {
    #[serde(default)]
    pub filename: String,
}

/// Imports one file from the server-side drop directory.
#[post("/imports/run")]
pub async fn import_file(
    staff: Staff,
    session: Session,
    settings: Data<Settings>,
    form: Form<ImportFileDto>,
) -> Response {
    let filename = form.filename.trim();
    if filename.is_empty() {
        push_flash(&session, "error", "No filename specified.");
        return Ok(see_other("/imports"));
    }
    let Some(name) = Path::new(filename)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
    else {
        push_flash(&session, "error", format!("File not found: {filename}"));
        return Ok(see_other("/imports"));
    };
    let path = settings.import_files_dir.join(&name);
    if !path.is_file() {
        push_flash(&session, "error", format!("File not found: {name}"));
        return Ok(see_other("/imports"));
    }
    let (request, summary) = match load_file(&path, &settings.default_agent) {
        Ok(loaded) => loaded,
        Err(err) => {
            push_flash(&session, "error", format!("Failed to read {name}: {err}"));
            return Ok(see_other("/imports"));
        }
    };
    match staff.service.bulk_insert(&request).await {
        Ok(()) => {
            log::info!("{} imported {name}", staff.user.username);
            push_flash(&session, "success", format!("Imported {name}\n{summary}"));
        }
        Err(err) => {
            log::error!("Bulk insert of {name} failed: {err}");
            push_flash(&session, "error", format!("API error importing {name}: {err}"));
        }
    }
    Ok(see_other("/imports"))
}

#[derive(MultipartForm)]
pub struct UploadForm {
    pub file: Option<TempFile>,
}

fn rejected(error: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({"success": false, "error": error.to_string()}))
}

fn deep_link(seller: &str, event: &str) -> String {
    match serde_urlencoded::to_string([("seller", seller), ("event", event)]) {
        Ok(query) => format!("/?{query}"),
        Err(_) => "/".to_string(),
    }
}

fn merged(summary: &MergeSummary) -> HttpResponse {
    let mut body = json!({
        "success": true,
        "merge": {
            "added": summary.added,
            "updated": summary.updated,
            "unchanged": summary.unchanged,
            "failed": summary.failed,
        },
        "redirect": deep_link(&summary.seller_display_id, &summary.customer_catalog_id),
    });
    if summary.failed > 0 {
        body["warnings"] = json!(summary.errors);
        body["recovery_url"] = json!("/imports/recovery/");
    }
    HttpResponse::Ok().json(body)
}

/// Creates the event and its sellers in one bulk call, then finds the new
/// event for the deep link.
async fn insert_new(
    service: &CatalogService,
    request: &BulkInsertRequest,
    customer_catalog_id: &str,
) -> Result<String, ApiError> {
    service.bulk_insert(request).await?;
    let Some(catalog_id) = service.find_catalog_by_customer_id(customer_catalog_id).await? else {
        return Ok("/".to_string());
    };
    let event = service.get_catalog(catalog_id).await?;
    for seller in &event.sellers {
        service.invalidate_seller_catalogs(seller.id).await;
    }
    Ok(deep_link(
        event.seller_display_id().unwrap_or_default(),
        customer_catalog_id,
    ))
}

/// Drag-and-drop upload. Answers with JSON for the drop zone script: a new
/// event is bulk inserted, an existing one is merged lot by lot.
#[post("/imports/upload")]
pub async fn upload_catalog(
    req: HttpRequest,
    staff: Staff,
    settings: Option<Data<Settings>>,
    form: Result<MultipartForm<UploadForm>, actix_web::Error>,
) -> Response {
    let form = match form {
        Ok(form) => form.into_inner(),
        Err(err) if is_oversized(&req, &err) => return Ok(rejected(TOO_LARGE)),
        Err(err) => {
            log::debug!("Upload without a usable multipart body: {err}");
            return Ok(rejected("No file uploaded"));
        }
    };
    let Some(file) = form.file else {
        return Ok(rejected("No file uploaded"));
    };
    let name = file.file_name.clone().unwrap_or_default();
    if name.trim().is_empty() {
        return Ok(rejected("No file uploaded"));
    }
    if let Err(err) = supported_extension(&name) {
        return Ok(rejected(err));
    }
    if file.size > MAX_UPLOAD_SIZE {
        return Ok(rejected(TOO_LARGE));
    }
    let bytes = match tokio::fs::read(file.file.path()).await {
        Ok(bytes) => bytes,
        Err(err) => return Ok(rejected(format!("Failed to parse file: {err}"))),
    };
    let (request, summary) = match load_bytes(&name, bytes, &agent(settings.as_ref())) {
        Ok(loaded) => loaded,
        Err(err) => return Ok(rejected(format!("Failed to parse file: {err}"))),
    };
    let Some(customer_catalog_id) = request
        .catalogs
        .first()
        .map(|c| c.customer_catalog_id.clone())
    else {
        return Ok(rejected("File contains no catalog data"));
    };
    log::info!("{} uploaded {name}\n{summary}", staff.user.username);

    let existing = match staff
        .service
        .find_catalog_by_customer_id(&customer_catalog_id)
        .await
    {
        Ok(existing) => existing,
        Err(err) => {
            return Ok(HttpResponse::InternalServerError()
                .json(json!({"success": false, "error": format!("API error: {err}")})))
        }
    };
    match existing {
        Some(catalog_id) => {
            match merge_catalog(&staff.service, &staff.recovery, &request, catalog_id).await {
                Ok(summary) => Ok(merged(&summary)),
                Err(err) => {
                    log::error!("Merge of {name} into event {catalog_id} failed: {err}");
                    Ok(HttpResponse::InternalServerError()
                        .json(json!({"success": false, "error": format!("Merge failed: {err}")})))
                }
            }
        }
        None => match insert_new(&staff.service, &request, &customer_catalog_id).await {
            Ok(redirect) => Ok(HttpResponse::Ok().json(json!({
                "success": true,
                "redirect": redirect,
            }))),
            Err(err) => {
                log::error!("Bulk insert of {name} failed: {err}");
                Ok(HttpResponse::InternalServerError()
                    .json(json!({"success": false, "error": format!("API error: {err}")})))
            }
        },
    }
}
