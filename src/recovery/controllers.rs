use super::RecoveryEntry;
use crate::access::StaffUser;
use crate::control::{filters, render_template, see_other, Response, Staff};
use actix_web::{
    get,
    http::header::ContentType,
    post,
    web::{Path, Query},
    HttpResponse,
};
use askama::Template;
use catalog_api::{ApiError, LotDto};
use serde::Deserialize;

const ENTRY_NOT_FOUND: &str = r#"<tr><td colspan="6">Entry not found in recovery cache</td></tr>"#;
const ALL_DONE: &str = r#"<tr id="recovery-all-done"><td colspan="6" class="empty-state">All items recovered. <a href="/">Return to catalog</a></td></tr>"#;

fn html(body: impl Into<String>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(body.into())
}

#[derive(Template)]
#[template(path = "recovery.html")]
struct RecoveryPage {
    user: Option<StaffUser>,
    entries: Vec<RecoveryEntry>,
}

#[get("/imports/recovery")]
pub async fn recovery_dashboard(staff: Staff) -> Response {
    render_template(RecoveryPage {
        user: staff.page_user(),
        entries: staff.recovery.entries().await,
    })
}

#[derive(Template)]
#[template(path = "partials/recovery_status.html")]
struct RecoveryStatus {
    lot: Option<LotDto>,
    error: Option<String>,
}

/// Tells whether the lot of an entry is currently on the server.
#[post("/imports/recovery/check/{customer_item_id}")]
pub async fn recovery_check(staff: Staff, path: Path<String>) -> Response {
    let status = match staff.service.find_lot_by_item(&path).await {
        Ok(lot) => RecoveryStatus { lot, error: None },
        Err(err) => RecoveryStatus {
            lot: None,
            error: Some(err.to_string()),
        },
    };
    render_template(status)
}

#[derive(Template)]
#[template(path = "partials/recovery_row.html")]
struct RecoveryRow {
    entry: RecoveryEntry,
    existing: Option<LotDto>,
    success: bool,
    all_recovered: bool,
    error: Option<String>,
}

impl RecoveryRow {
    fn new(entry: RecoveryEntry) -> Self {
        Self {
            entry,
            existing: None,
            success: false,
            all_recovered: false,
            error: None,
        }
    }
}

#[derive(Deserialize)]
struct RetryQuery {
    force: Option<String>,
}

/// Recreates the lot from the stored request. Without `force=true` an
/// existing lot is reported instead of replaced.
#[post("/imports/recovery/retry/{customer_item_id}")]
pub async fn recovery_retry(staff: Staff, path: Path<String>, q: Query<RetryQuery>) -> Response {
    let item = path.into_inner();
    let force = q.force.as_deref() == Some("true");
    let Some(entry) = staff.recovery.find(&item).await else {
        return Ok(html(ENTRY_NOT_FOUND));
    };
    let catalog_id = entry.catalog_id;
    let mut row = RecoveryRow::new(entry);
    let retried = async {
        let existing = staff.service.find_lot_by_item(&item).await?;
        match existing {
            Some(lot) if !force => {
                row.existing = Some(lot);
                return Ok(());
            }
            Some(lot) => {
                log::info!("Replacing lot {} ({item}) from recovery", lot.id);
                staff.service.delete_lot(lot.id).await?;
                staff.service.invalidate_catalog(catalog_id).await;
            }
            None => {}
        }
        staff.service.create_lot(&row.entry.add_lot_request).await?;
        staff.service.invalidate_catalog(catalog_id).await;
        staff.recovery.remove(&item).await;
        row.success = true;
        row.all_recovered = staff.recovery.entries().await.is_empty();
        Ok::<(), ApiError>(())
    }
    .await;
    if let Err(err) = retried {
        log::warn!("Recovery retry of {item} failed: {err}");
        row.error = Some(err.to_string());
    }
    render_template(row)
}

#[post("/imports/recovery/skip/{customer_item_id}")]
pub async fn recovery_skip(staff: Staff, path: Path<String>) -> Response {
    staff.recovery.remove(&path).await;
    if staff.recovery.entries().await.is_empty() {
        Ok(html(ALL_DONE))
    } else {
        Ok(html(""))
    }
}

#[post("/imports/recovery/clear")]
pub async fn recovery_clear(staff: Staff) -> Response {
    staff.recovery.clear().await;
    Ok(see_other("/imports/recovery"))
}
