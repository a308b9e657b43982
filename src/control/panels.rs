//! HTML fragments for the three-panel shell. Every handler answers with a
//! fragment, also on upstream failure, so the shell never breaks.

use super::lot_fields::{
    detail_rows, inline_override, lot_rows, DetailRow, FieldError, LotRow, OverrideForm,
};
use super::{filters, render_template, ControllerError, Response, Staff};
use crate::pagination::{paginate, PageQuery, Pager};
use actix_web::{
    get,
    http::header::ContentType,
    post,
    web::{Form, Path, Query},
    HttpResponse,
};
use anyhow::anyhow;
use askama::Template;
use catalog_api::{ApiError, CatalogDto, CatalogQuery, SellerDto, SellerQuery};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

pub const PANEL_PAGE_SIZE: u32 = 50;
pub const LOTS_PAGE_SIZE: u32 = 25;

const SELLERS_TARGET: &str = "#panel-left1-content";
const EVENTS_TARGET: &str = "#panel-left2-content";
const LOTS_TARGET: &str = "#panel-main-content";
const MODAL_TARGET: &str = "#lot-modal-body";

#[derive(Template)]
#[template(path = "partials/panel_error.html")]
struct PanelError<'a> {
    message: &'a str,
    retry_url: &'a str,
    retry_target: &'a str,
}

fn panel_error(message: &str, retry_url: &str, retry_target: &str) -> Response {
    render_template(PanelError {
        message,
        retry_url,
        retry_target,
    })
}

fn html(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(body)
}

fn render_fragment(t: impl Template) -> Result<String, ControllerError> {
    t.render()
        .map_err(|e| ControllerError::InternalServerError(anyhow!(e)))
}

/// A list entry of the left panels, marked when it is the current choice.
pub struct Choice<T> {
    pub item: T,
    pub selected: bool,
}

fn choices<T>(items: Vec<T>, selected: impl Fn(&T) -> bool) -> Vec<Choice<T>> {
    items
        .into_iter()
        .map(|item| Choice {
            selected: selected(&item),
            item,
        })
        .collect()
}

fn trimmed(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[derive(Template)]
#[template(path = "partials/sellers_panel.html")]
struct SellersPanel {
    sellers: Vec<Choice<SellerDto>>,
    sellers_pager: Pager,
    name: String,
}

#[derive(Deserialize)]
struct SellersPanelQuery {
    #[serde(flatten)]
    page: PageQuery,
    selected: Option<String>,
    #[serde(default)]
    name: String,
}

#[get("/panels/sellers")]
pub async fn sellers_panel(staff: Staff, q: Query<SellersPanelQuery>) -> Response {
    let (page, page_size) = q.page.resolve(PANEL_PAGE_SIZE);
    let selected = q
        .selected
        .as_deref()
        .and_then(|s| s.trim().parse::<i64>().ok());
    let name = q.name.trim().to_string();
    let query = SellerQuery {
        name: trimmed(&name),
        ..SellerQuery::page(page, page_size)
    };
    let mut result = match staff.service.list_sellers(query).await {
        Ok(result) => result,
        Err(err) => {
            log::error!("Unable to load sellers: {err}");
            return panel_error("Could not load sellers", "/panels/sellers", SELLERS_TARGET);
        }
    };
    result.items = staff.policy.filter_sellers(&staff.user, result.items);
    let mut params = vec![("name", name.clone())];
    if let Some(selected) = selected {
        params.push(("selected", selected.to_string()));
    }
    let sellers_pager =
        Pager::new(&result, "/panels/sellers", &params, page_size).target(SELLERS_TARGET);
    render_template(SellersPanel {
        sellers: choices(result.items, |s| Some(s.id) == selected),
        sellers_pager,
        name,
    })
}

#[derive(Template)]
#[template(path = "partials/events_panel.html")]
struct EventsPanel {
    seller: SellerDto,
    events: Vec<Choice<CatalogDto>>,
    events_pager: Pager,
    title: String,
    sellers: Vec<Choice<SellerDto>>,
    sellers_pager: Pager,
}

#[derive(Deserialize)]
struct EventsPanelQuery {
    #[serde(flatten)]
    page: PageQuery,
    #[serde(default)]
    title: String,
}

#[get("/panels/sellers/{seller_id}/events")]
pub async fn seller_events_panel(
    staff: Staff,
    path: Path<i64>,
    q: Query<EventsPanelQuery>,
) -> Response {
    let seller_id = path.into_inner();
    if !staff.policy.can_access_seller(&staff.user, seller_id) {
        return Err(ControllerError::Forbidden);
    }
    let (page, page_size) = q.page.resolve(PANEL_PAGE_SIZE);
    let title = q.title.trim().to_string();
    let retry_url = format!("/panels/sellers/{seller_id}/events");
    let loaded = async {
        let seller = staff.service.get_seller(seller_id).await?;
        let query = CatalogQuery {
            title: trimmed(&title),
            seller_ids: Some(seller_id),
            ..CatalogQuery::page(page, page_size)
        };
        let events = staff.service.list_catalogs(query, true, false).await?;
        let sellers = staff
            .service
            .list_sellers(SellerQuery::page(1, PANEL_PAGE_SIZE))
            .await?;
        Ok::<_, ApiError>((seller, events, sellers))
    }
    .await;
    let (seller, mut events, mut sellers) = match loaded {
        Ok(loaded) => loaded,
        Err(err) => {
            log::error!("Unable to load events for seller {seller_id}: {err}");
            return panel_error("Could not load events", &retry_url, EVENTS_TARGET);
        }
    };
    events.items = staff.policy.filter_events(&staff.user, events.items);
    sellers.items = staff.policy.filter_sellers(&staff.user, sellers.items);
    let events_pager = Pager::new(&events, &retry_url, &[("title", title.clone())], page_size)
        .target(EVENTS_TARGET);
    let sellers_pager = Pager::new(
        &sellers,
        "/panels/sellers",
        &[("selected", seller_id.to_string())],
        PANEL_PAGE_SIZE,
    )
    .target(SELLERS_TARGET);
    let push_url = format!(
        "/?seller={}",
        seller.customer_display_id.as_deref().unwrap_or_default()
    );
    let body = render_fragment(EventsPanel {
        seller,
        events: choices(events.items, |_| false),
        events_pager,
        title,
        sellers: choices(sellers.items, |s| s.id == seller_id),
        sellers_pager,
    })?;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::html())
        .insert_header(("HX-Push-Url", push_url))
        .body(body))
}

#[derive(Template)]
#[template(path = "partials/lots_panel.html")]
struct LotsPanel {
    event_id: i64,
    event_title: String,
    rows: Vec<LotRow>,
    lots_pager: Pager,
    seller_id: Option<i64>,
    events: Vec<Choice<CatalogDto>>,
    events_pager: Option<Pager>,
}

#[derive(Deserialize)]
struct LotsPanelQuery {
    #[serde(flatten)]
    page: PageQuery,
    item: Option<String>,
}

/// Lots of one event. The event carries only lot references, so the page is
/// cut locally and the full records are fetched concurrently.
#[get("/panels/events/{event_id}/lots")]
pub async fn event_lots_panel(
    staff: Staff,
    path: Path<i64>,
    q: Query<LotsPanelQuery>,
) -> Response {
    let event_id = path.into_inner();
    if !staff.policy.can_access_event(&staff.user, event_id) {
        return Err(ControllerError::Forbidden);
    }
    let (page, page_size) = q.page.resolve(LOTS_PAGE_SIZE);
    let retry_url = format!("/panels/events/{event_id}/lots");
    let loaded = async {
        let event = staff.service.get_catalog(event_id).await?;
        let refs = paginate(event.lots.clone(), page, page_size);
        let ids: Vec<i64> = refs.items.iter().map(|r| r.id).collect();
        let lots = staff.service.get_lots_for_event(&ids).await;
        let seller = event.seller().cloned();
        let events = match &seller {
            Some(seller) => {
                let query = CatalogQuery {
                    seller_ids: Some(seller.id),
                    ..CatalogQuery::page(1, PANEL_PAGE_SIZE)
                };
                Some(staff.service.list_catalogs(query, true, false).await?)
            }
            None => None,
        };
        Ok::<_, ApiError>((event, refs, lots, seller, events))
    }
    .await;
    let (event, refs, lots, seller, events) = match loaded {
        Ok(loaded) => loaded,
        Err(err) => {
            log::error!("Unable to load lots for event {event_id}: {err}");
            return panel_error("Could not load lots", &retry_url, LOTS_TARGET);
        }
    };
    let highlight = q.item.as_deref().map(str::trim).filter(|i| !i.is_empty());
    let lots_pager = Pager::new(&refs, &retry_url, &[], page_size).target(LOTS_TARGET);
    let (events, events_pager) = match (&seller, events) {
        (Some(seller), Some(events)) => {
            let pager = Pager::new(
                &events,
                &format!("/panels/sellers/{}/events", seller.id),
                &[],
                PANEL_PAGE_SIZE,
            )
            .target(EVENTS_TARGET);
            let events = staff.policy.filter_events(&staff.user, events.items);
            (choices(events, |e| e.id == event_id), Some(pager))
        }
        _ => (Vec::new(), None),
    };
    let push_url = seller.as_ref().map(|seller| {
        format!(
            "/?seller={}&event={}",
            seller.customer_display_id.as_deref().unwrap_or_default(),
            event.catalog.customer_catalog_id.as_deref().unwrap_or_default()
        )
    });
    let body = render_fragment(LotsPanel {
        event_id,
        event_title: event.catalog.title.clone(),
        rows: lot_rows(&lots, highlight),
        lots_pager,
        seller_id: seller.as_ref().map(|s| s.id),
        events,
        events_pager,
    })?;
    let mut res = HttpResponse::Ok();
    res.content_type(ContentType::html());
    if let Some(push_url) = push_url {
        res.insert_header(("HX-Push-Url", push_url));
    }
    Ok(res.body(body))
}

#[derive(Template)]
#[template(path = "partials/lot_row.html")]
struct LotRowPartial {
    row: LotRow,
}

#[derive(Template)]
#[template(path = "partials/lot_detail_modal.html")]
struct LotDetailModal {
    lot_id: i64,
    title: String,
    rows: Vec<DetailRow>,
    has_override: bool,
}

#[derive(Template)]
#[template(path = "partials/lot_edit_modal.html")]
struct LotEditModal {
    lot_id: i64,
    title: String,
    form: OverrideForm,
    errors: Vec<FieldError>,
}

fn modal_title(lot: &catalog_api::LotDto) -> String {
    format!(
        "Lot {} ({})",
        lot.lot_number(),
        lot.customer_item_id.as_deref().unwrap_or_default()
    )
}

#[derive(Deserialize)]
struct DetailQuery {
    edit: Option<String>,
}

#[get("/panels/lots/{lot_id}/detail")]
pub async fn lot_detail_panel(staff: Staff, path: Path<i64>, q: Query<DetailQuery>) -> Response {
    let lot_id = path.into_inner();
    let lot = match staff.service.get_lot(lot_id).await {
        Ok(lot) => lot,
        Err(err) => {
            log::error!("Unable to load lot {lot_id}: {err}");
            return panel_error(
                "Could not load lot details",
                &format!("/panels/lots/{lot_id}/detail"),
                MODAL_TARGET,
            );
        }
    };
    if q.edit.as_deref() == Some("1") {
        return render_template(LotEditModal {
            lot_id,
            title: modal_title(&lot),
            form: OverrideForm::for_lot(&lot),
            errors: Vec::new(),
        });
    }
    let (rows, has_override) = detail_rows(&lot);
    render_template(LotDetailModal {
        lot_id,
        title: modal_title(&lot),
        rows,
        has_override,
    })
}

/// The saved row, marked for an out-of-band swap of the row already on
/// screen.
fn oob_row(lot: &catalog_api::LotDto) -> Result<String, ControllerError> {
    let row = render_fragment(LotRowPartial {
        row: LotRow::new(lot),
    })?;
    let anchor = format!("<tr id=\"lot-row-{}\"", lot.id);
    Ok(row.replacen(&anchor, &format!("{anchor} hx-swap-oob=\"outerHTML\""), 1))
}

#[post("/panels/lots/{lot_id}/detail")]
pub async fn save_lot_detail_panel(
    staff: Staff,
    path: Path<i64>,
    form: Form<OverrideForm>,
) -> Response {
    let lot_id = path.into_inner();
    let form = form.into_inner();
    let lot = match staff.service.get_lot(lot_id).await {
        Ok(lot) => lot,
        Err(err) => {
            log::error!("Unable to load lot {lot_id}: {err}");
            return panel_error(
                "Could not load lot details",
                &format!("/panels/lots/{lot_id}/detail"),
                MODAL_TARGET,
            );
        }
    };
    let data = match form.validate() {
        Ok(data) => data,
        Err(errors) => {
            return render_template(LotEditModal {
                lot_id,
                title: modal_title(&lot),
                form,
                errors,
            })
        }
    };
    let saved = async {
        staff.service.save_lot_override(lot_id, &data).await?;
        staff.service.get_lot(lot_id).await
    }
    .await;
    match saved {
        Ok(lot) => {
            let trigger = json!({
                "closeModal": true,
                "showToast": {"message": "Override saved", "type": "success"},
            });
            Ok(HttpResponse::Ok()
                .content_type(ContentType::html())
                .insert_header(("HX-Trigger", trigger.to_string()))
                .body(oob_row(&lot)?))
        }
        Err(err) => {
            log::error!("Unable to save override for lot {lot_id}: {err}");
            let body = render_fragment(PanelError {
                message: "Could not save override",
                retry_url: &format!("/panels/lots/{lot_id}/detail?edit=1"),
                retry_target: MODAL_TARGET,
            })?;
            let trigger = json!({
                "showToast": {"message": "Could not save override", "type": "error"},
            });
            Ok(HttpResponse::Ok()
                .content_type(ContentType::html())
                .insert_header(("HX-Trigger", trigger.to_string()))
                .body(body))
        }
    }
}

/// Inline edit of a table row. Unparsable numbers are dropped rather than
/// reported.
#[post("/panels/lots/{lot_id}/override")]
pub async fn lot_override_panel(
    staff: Staff,
    path: Path<i64>,
    form: Form<HashMap<String, String>>,
) -> Response {
    let lot_id = path.into_inner();
    let data = inline_override(&form);
    let saved = async {
        staff.service.save_lot_override(lot_id, &data).await?;
        staff.service.get_lot(lot_id).await
    }
    .await;
    match saved {
        Ok(lot) => Ok(html(render_fragment(LotRowPartial {
            row: LotRow::new(&lot),
        })?)),
        Err(err) => {
            log::error!("Unable to save override for lot {lot_id}: {err}");
            panel_error("Could not save override", "/", LOTS_TARGET)
        }
    }
}
