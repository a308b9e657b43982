use crate::access::{
    self, rehydrate, AccessPolicy, Rehydrated, Rejection, SessionState, StaffAccessPolicy,
    StaffUser, SESSION_TOKEN, SESSION_USER, SESSION_USERNAME,
};
use crate::cache::SafeCache;
use crate::catalog::{CatalogService, DEFAULT_FETCH_WORKERS};
use crate::config::Settings;
use crate::pagination::{page_url, paginate, PageQuery, Pager};
use crate::recovery::RecoveryStore;
use crate::{empty_string_as_none, import, recovery};
use actix_session::Session;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    get,
    http::header::ContentType,
    post,
    web::{self, Data, Form, FormConfig, Path, Query},
    FromRequest, HttpMessage, HttpRequest, HttpResponse,
};
use anyhow::anyhow;
use askama::Template;
use catalog_api::{
    AccessToken, ApiError, CatalogExpandedDto, CatalogQuery, Connector, LotCatalogInformation,
    LotDto, SellerDto, SellerQuery,
};
use derive_more::{Display, Error};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use log_error::LogError;
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::sync::Arc;
use time::OffsetDateTime;

pub mod lot_fields;
pub mod panels;

pub mod filters {
    use time::macros::format_description;
    use time::OffsetDateTime;

    pub fn datetime(value: &OffsetDateTime) -> askama::Result<String> {
        Ok(value
            .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
            .unwrap_or_default())
    }

    /// Empty when the date is unknown.
    pub fn date(value: &Option<OffsetDateTime>) -> askama::Result<String> {
        match value {
            Some(value) => datetime(value),
            None => Ok(String::new()),
        }
    }

    pub fn yes_no(value: &Option<bool>) -> askama::Result<&'static str> {
        Ok(match value {
            Some(true) => "Yes",
            Some(false) => "No",
            None => "",
        })
    }
}

use lot_fields::{detail_rows, DetailRow, FieldError, OverrideForm};
use panels::LOTS_PAGE_SIZE;

pub type Response = Result<HttpResponse, ControllerError>;

pub const PENDING_TOAST: &str = "pending_toast";
pub const FLASH: &str = "flash";
const EXEMPT_PATHS: [&str; 3] = ["/login", "/static", "/no-access"];
const LIST_PAGE_SIZE: u32 = 25;

#[derive(Debug, Display, Error)]
pub enum ControllerError {
    NotFound,
    Unauthorized,
    Forbidden,
    #[display("{_0}")]
    Upstream(ApiError),
    #[error(ignore)]
    InternalServerError(anyhow::Error),
    #[error(ignore)]
    #[display("Invalid field {field}")]
    InvalidInput {
        field: String,
        msg: String,
    },
}

impl From<anyhow::Error> for ControllerError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalServerError(err)
    }
}

impl From<ApiError> for ControllerError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Auth(_) | ApiError::Status { status: 401, .. } => Self::Unauthorized,
            ApiError::Status { status: 403, .. } => Self::Forbidden,
            err => Self::Upstream(err),
        }
    }
}

fn html_or(
    rendered: Result<String, askama::Error>,
    mut builder: actix_web::HttpResponseBuilder,
) -> HttpResponse {
    rendered
        .log_error("Unable to render error template")
        .map(|res| builder.content_type(ContentType::html()).body(res))
        .unwrap_or_else(|| builder.finish())
}

impl actix_web::error::ResponseError for ControllerError {
    fn error_response(&self) -> HttpResponse {
        log::warn!("{self:?}");
        use ControllerError::*;
        match self {
            NotFound => html_or(NotFoundPage { user: None }.render(), HttpResponse::NotFound()),
            Upstream(err) if err.is_not_found() => {
                html_or(NotFoundPage { user: None }.render(), HttpResponse::NotFound())
            }
            Unauthorized => see_other("/login"),
            Forbidden => html_or(ForbiddenPage { user: None }.render(), HttpResponse::Forbidden()),
            Upstream(err) => html_or(
                UpstreamErrorPage {
                    message: err.to_string(),
                    user: None,
                }
                .render(),
                HttpResponse::BadGateway(),
            ),
            InternalServerError(err) => html_or(
                InternalServerErrorPage {
                    error: format!("{err:?}"),
                    user: None,
                }
                .render(),
                HttpResponse::InternalServerError(),
            ),
            InvalidInput { field, msg } => {
                HttpResponse::BadRequest().body(format!("{field}\n{msg}"))
            }
        }
    }
}

/// Urlencoded form limits. A body that cannot be decoded is answered with
/// [`ControllerError::InvalidInput`].
pub fn form_config() -> FormConfig {
    FormConfig::default()
        .limit(256 * 1024)
        .error_handler(|err, _req| {
            ControllerError::InvalidInput {
                field: "form".to_string(),
                msg: err.to_string(),
            }
            .into()
        })
}

#[derive(Template)]
#[template(path = "500.html")]
pub struct InternalServerErrorPage {
    error: String,
    user: Option<StaffUser>,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct UpstreamErrorPage {
    message: String,
    user: Option<StaffUser>,
}

#[derive(Template)]
#[template(path = "404.html")]
pub struct NotFoundPage {
    user: Option<StaffUser>,
}

pub async fn not_found() -> Response {
    Err(ControllerError::NotFound)
}

#[derive(Template)]
#[template(path = "403.html")]
pub struct ForbiddenPage {
    user: Option<StaffUser>,
}

pub fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .insert_header(("Location", location))
        .finish()
}

pub fn render_template(t: impl Template) -> Result<HttpResponse, ControllerError> {
    let result = t
        .render()
        .map_err(|x| ControllerError::InternalServerError(anyhow!(x)))?;
    Ok(HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(result))
}

pub fn is_htmx(req: &HttpRequest) -> bool {
    req.headers().contains_key("HX-Request")
}

/// HTMX follows plain redirects inside the XHR, so it gets told to navigate
/// instead.
fn redirect_for(req: &HttpRequest, location: &str) -> HttpResponse {
    if is_htmx(req) {
        HttpResponse::Ok()
            .insert_header(("HX-Redirect", location))
            .finish()
    } else {
        see_other(location)
    }
}

/// One-off message shown on the next page: a toast on the shell or a flash
/// line on the imports page.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Toast {
    pub msg: String,
    #[serde(rename = "type")]
    pub level: String,
}

impl Toast {
    pub fn new(level: &str, msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            level: level.to_string(),
        }
    }
}

pub fn push_flash(session: &Session, level: &str, msg: impl Into<String>) {
    let mut flashes = session
        .get::<Vec<Toast>>(FLASH)
        .log_error("Unable to read flash messages")
        .flatten()
        .unwrap_or_default();
    flashes.push(Toast::new(level, msg));
    session
        .insert(FLASH, flashes)
        .log_error("Unable to store flash messages");
}

pub fn take_flashes(session: &Session) -> Vec<Toast> {
    session
        .remove_as::<Vec<Toast>>(FLASH)
        .and_then(Result::ok)
        .unwrap_or_default()
}

pub fn read_session(session: &Session) -> SessionState {
    SessionState {
        token: session
            .get::<AccessToken>(SESSION_TOKEN)
            .log_error("Unable to read token from session")
            .flatten(),
        username: session
            .get::<String>(SESSION_USERNAME)
            .log_error("Unable to read username from session")
            .flatten(),
        user: session
            .get::<StaffUser>(SESSION_USER)
            .log_error("Unable to read user from session")
            .flatten(),
    }
}

/// Authenticated identity of the current request, put in place by
/// [`StaffGuard`].
#[derive(Clone, Debug)]
pub struct StaffSession {
    pub user: StaffUser,
    pub token: AccessToken,
}

fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.iter().any(|p| {
        path.strip_prefix(p)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// Resolves the session into a [`StaffSession`], or the location the visitor
/// has to go to instead.
async fn authorize(req: &ServiceRequest, session: &Session) -> Result<StaffSession, &'static str> {
    let state = read_session(session);
    let user = match rehydrate(&state) {
        Ok(Rehydrated::Existing(user)) => user,
        Ok(Rehydrated::Bridged(user)) => {
            log::info!("Bridged legacy session for {}", user.username);
            session
                .insert(SESSION_USER, &user)
                .log_error("Unable to store user in session");
            user
        }
        Err(Rejection::NotAuthenticated) => return Err("/login"),
        Err(Rejection::Unbridgeable) => {
            session.purge();
            return Err("/login");
        }
    };
    let Some(mut token) = state.token else {
        return Err("/login");
    };
    if token.is_expired(OffsetDateTime::now_utc()) {
        let connector = req
            .app_data::<Data<dyn Connector>>()
            .ok_or("/login")?;
        let Some(refresh_token) = token.refresh_token.clone() else {
            session.purge();
            return Err("/login");
        };
        token = match connector.refresh(&refresh_token).await {
            Ok(token) => {
                session
                    .insert(SESSION_TOKEN, &token)
                    .log_error("Unable to store refreshed token");
                token
            }
            Err(err) => {
                log::warn!("Unable to refresh token for {}: {err}", user.username);
                session.purge();
                return Err("/login");
            }
        };
    }
    let authorized = match req.app_data::<Data<dyn AccessPolicy>>() {
        Some(policy) => policy.is_authorized(&user),
        None => StaffAccessPolicy.is_authorized(&user),
    };
    if !authorized {
        return Err("/no-access");
    }
    Ok(StaffSession { user, token })
}

pub struct StaffGuard;

impl<S, B> Transform<S, ServiceRequest> for StaffGuard
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Transform = StaffGuardMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(StaffGuardMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct StaffGuardMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for StaffGuardMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        Box::pin(async move {
            if is_exempt(req.path()) {
                return service
                    .call(req)
                    .await
                    .map(ServiceResponse::map_into_left_body);
            }
            let session = req.extract::<Session>().await?;
            match authorize(&req, &session).await {
                Ok(staff) => {
                    req.extensions_mut().insert(staff);
                    service
                        .call(req)
                        .await
                        .map(ServiceResponse::map_into_left_body)
                }
                Err(location) => {
                    let res = redirect_for(req.request(), location);
                    Ok(req.into_response(res).map_into_right_body())
                }
            }
        })
    }
}

/// Everything a handler needs to act for the signed-in staff member.
pub struct Staff {
    pub user: StaffUser,
    pub service: CatalogService,
    pub recovery: RecoveryStore,
    pub policy: Data<dyn AccessPolicy>,
}

impl Staff {
    fn from_request_parts(req: &HttpRequest) -> Result<Self, ControllerError> {
        let StaffSession { user, token } = req
            .extensions()
            .get::<StaffSession>()
            .cloned()
            .ok_or(ControllerError::Unauthorized)?;
        let connector = req
            .app_data::<Data<dyn Connector>>()
            .ok_or_else(|| anyhow!("Catalog connector is not configured"))?;
        let cache = req
            .app_data::<Data<SafeCache>>()
            .ok_or_else(|| anyhow!("Cache is not configured"))?
            .get_ref()
            .clone();
        let workers = req
            .app_data::<Data<Settings>>()
            .map(|s| s.fetch_workers)
            .unwrap_or(DEFAULT_FETCH_WORKERS);
        let policy = req
            .app_data::<Data<dyn AccessPolicy>>()
            .cloned()
            .unwrap_or_else(|| Data::from(Arc::new(StaffAccessPolicy) as Arc<dyn AccessPolicy>));
        Ok(Self {
            service: CatalogService::new(connector.connect(&token), cache.clone(), workers),
            recovery: RecoveryStore::new(cache, &user.username),
            user,
            policy,
        })
    }

    pub fn page_user(&self) -> Option<StaffUser> {
        Some(self.user.clone())
    }
}

impl FromRequest for Staff {
    type Error = ControllerError;
    type Future = Ready<Result<Self, Self::Error>>;

    #[inline]
    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(Staff::from_request_parts(req))
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage {
    user: Option<StaffUser>,
    toast: Option<Toast>,
    sellers_url: String,
    events_url: Option<String>,
    lots_url: Option<String>,
}

#[derive(Deserialize)]
struct DeepLink {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    seller: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    event: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    item: Option<String>,
}

/// The three-panel shell. `?seller=&event=&item=` preloads the panels down
/// to the page holding the item.
#[get("/")]
pub async fn index(staff: Staff, session: Session, q: Query<DeepLink>) -> Response {
    let q = q.into_inner();
    let mut page = IndexPage {
        user: staff.page_user(),
        toast: session.remove_as::<Toast>(PENDING_TOAST).and_then(Result::ok),
        sellers_url: "/panels/sellers".to_string(),
        events_url: None,
        lots_url: None,
    };
    let Some(display_id) = q.seller else {
        return render_template(page);
    };
    let seller = match staff.service.find_seller_by_display_id(&display_id).await {
        Ok(Some(seller)) => seller,
        Ok(None) => {
            page.toast = Some(Toast::new("warning", format!("Seller {display_id} not found")));
            return render_template(page);
        }
        Err(err) => {
            log::warn!("Unable to resolve seller {display_id}: {err}");
            page.toast = Some(Toast::new("error", "Could not load sellers"));
            return render_template(page);
        }
    };
    page.sellers_url = format!("/panels/sellers?selected={}", seller.id);
    page.events_url = Some(format!("/panels/sellers/{}/events", seller.id));
    if let Some(event) = q.event {
        match staff.service.find_catalog_by_customer_id(&event).await {
            Ok(Some(catalog_id)) => {
                page.lots_url =
                    Some(deep_link_lots_url(&staff.service, catalog_id, q.item.as_deref()).await)
            }
            Ok(None) => page.toast = Some(Toast::new("warning", format!("Event {event} not found"))),
            Err(err) => log::warn!("Unable to resolve event {event}: {err}"),
        }
    }
    render_template(page)
}

async fn deep_link_lots_url(service: &CatalogService, catalog_id: i64, item: Option<&str>) -> String {
    let base = format!("/panels/events/{catalog_id}/lots");
    let Some(item) = item else {
        return base;
    };
    match service.resolve_item(item).await {
        Ok(Some(resolved)) if resolved.catalog_id == catalog_id => page_url(
            &base,
            &[("item", item.to_string())],
            resolved.lot_position as u32 / LOTS_PAGE_SIZE + 1,
            LOTS_PAGE_SIZE,
        ),
        Ok(_) => base,
        Err(err) => {
            log::warn!("Unable to resolve item {item}: {err}");
            base
        }
    }
}

#[derive(Template)]
#[template(path = "sellers.html")]
struct SellersPage {
    user: Option<StaffUser>,
    sellers: Vec<SellerDto>,
    pager: Pager,
    name: String,
    is_active: String,
}

#[derive(Deserialize)]
struct SellerFilter {
    #[serde(flatten)]
    page: PageQuery,
    #[serde(default)]
    name: String,
    #[serde(default)]
    is_active: String,
}

fn tri_state(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[get("/sellers")]
pub async fn sellers(staff: Staff, q: Query<SellerFilter>) -> Response {
    let (page, page_size) = q.page.resolve(LIST_PAGE_SIZE);
    let query = SellerQuery {
        name: non_empty(&q.name),
        is_active: tri_state(&q.is_active),
        ..SellerQuery::page(page, page_size)
    };
    let mut result = staff.service.list_sellers(query).await?;
    result.items = staff.policy.filter_sellers(&staff.user, result.items);
    let pager = Pager::new(
        &result,
        "/sellers",
        &[
            ("name", q.name.trim().to_string()),
            ("is_active", q.is_active.clone()),
        ],
        page_size,
    );
    render_template(SellersPage {
        user: staff.page_user(),
        sellers: result.items,
        pager,
        name: q.name.trim().to_string(),
        is_active: q.is_active.clone(),
    })
}

#[derive(Template)]
#[template(path = "seller.html")]
struct SellerPage {
    user: Option<StaffUser>,
    seller: SellerDto,
    events: Vec<catalog_api::CatalogDto>,
    pager: Pager,
    title: String,
    agent: String,
    is_completed: String,
}

#[derive(Deserialize)]
struct EventFilter {
    #[serde(flatten)]
    page: PageQuery,
    #[serde(default)]
    title: String,
    #[serde(default)]
    agent: String,
    #[serde(default)]
    is_completed: String,
}

#[get("/sellers/{seller_id}")]
pub async fn seller_detail(staff: Staff, path: Path<i64>, q: Query<EventFilter>) -> Response {
    let seller_id = path.into_inner();
    if !staff.policy.can_access_seller(&staff.user, seller_id) {
        return Err(ControllerError::Forbidden);
    }
    let seller = staff.service.get_seller(seller_id).await?;
    let (page, page_size) = q.page.resolve(LIST_PAGE_SIZE);
    let query = CatalogQuery {
        title: non_empty(&q.title),
        agent: non_empty(&q.agent),
        is_completed: tri_state(&q.is_completed),
        seller_ids: Some(seller_id),
        ..CatalogQuery::page(page, page_size)
    };
    let mut result = staff.service.list_catalogs(query, true, false).await?;
    result.items = staff.policy.filter_events(&staff.user, result.items);
    let pager = Pager::new(
        &result,
        &format!("/sellers/{seller_id}"),
        &[
            ("title", q.title.trim().to_string()),
            ("agent", q.agent.trim().to_string()),
            ("is_completed", q.is_completed.clone()),
        ],
        page_size,
    );
    render_template(SellerPage {
        user: staff.page_user(),
        seller,
        events: result.items,
        pager,
        title: q.title.trim().to_string(),
        agent: q.agent.trim().to_string(),
        is_completed: q.is_completed.clone(),
    })
}

#[derive(Template)]
#[template(path = "event.html")]
struct EventPage {
    user: Option<StaffUser>,
    event: CatalogExpandedDto,
    seller: Option<SellerDto>,
    lots: Vec<LotCatalogInformation>,
    pager: Pager,
}

#[get("/events/{event_id}")]
pub async fn event_detail(staff: Staff, path: Path<i64>, q: Query<PageQuery>) -> Response {
    let event_id = path.into_inner();
    if !staff.policy.can_access_event(&staff.user, event_id) {
        return Err(ControllerError::Forbidden);
    }
    let event = staff.service.get_catalog(event_id).await?;
    let (page, page_size) = q.resolve(LIST_PAGE_SIZE);
    let lots = paginate(event.lots.clone(), page, page_size);
    let pager = Pager::new(&lots, &format!("/events/{event_id}"), &[], page_size);
    render_template(EventPage {
        user: staff.page_user(),
        seller: event.seller().cloned(),
        event,
        lots: lots.items,
        pager,
    })
}

/// Event of a lot for breadcrumbs. Missing context never fails the page.
async fn lot_event(service: &CatalogService, lot: &LotDto) -> Option<CatalogExpandedDto> {
    let catalog_id = lot.catalog_id()?;
    service
        .get_catalog(catalog_id)
        .await
        .log_error("Unable to load event of lot")
}

#[derive(Template)]
#[template(path = "lot.html")]
struct LotPage {
    user: Option<StaffUser>,
    lot: LotDto,
    event: Option<CatalogExpandedDto>,
    rows: Vec<DetailRow>,
    has_override: bool,
}

#[get("/lots/{lot_id}")]
pub async fn lot_detail(staff: Staff, path: Path<i64>) -> Response {
    let lot = staff.service.get_lot(path.into_inner()).await?;
    let event = lot_event(&staff.service, &lot).await;
    let (rows, has_override) = detail_rows(&lot);
    render_template(LotPage {
        user: staff.page_user(),
        lot,
        event,
        rows,
        has_override,
    })
}

#[derive(Template)]
#[template(path = "lot_override.html")]
struct OverridePage {
    user: Option<StaffUser>,
    lot: LotDto,
    event: Option<CatalogExpandedDto>,
    form: OverrideForm,
    errors: Vec<FieldError>,
}

#[get("/lots/{lot_id}/override")]
pub async fn override_page(staff: Staff, path: Path<i64>) -> Response {
    let lot = staff.service.get_lot(path.into_inner()).await?;
    let event = lot_event(&staff.service, &lot).await;
    render_template(OverridePage {
        user: staff.page_user(),
        form: OverrideForm::for_lot(&lot),
        lot,
        event,
        errors: Vec::new(),
    })
}

#[post("/lots/{lot_id}/override")]
pub async fn save_override(staff: Staff, path: Path<i64>, form: Form<OverrideForm>) -> Response {
    let lot_id = path.into_inner();
    let form = form.into_inner();
    match form.validate() {
        Ok(data) => {
            staff.service.save_lot_override(lot_id, &data).await?;
            Ok(see_other(&format!("/lots/{lot_id}")))
        }
        Err(errors) => {
            let lot = staff.service.get_lot(lot_id).await?;
            let event = lot_event(&staff.service, &lot).await;
            render_template(OverridePage {
                user: staff.page_user(),
                lot,
                event,
                form,
                errors,
            })
        }
    }
}

#[derive(Template)]
#[template(path = "search.html")]
struct SearchPage {
    user: Option<StaffUser>,
    query: String,
    lots: Vec<LotDto>,
    pager: Option<Pager>,
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(flatten)]
    page: PageQuery,
    #[serde(default)]
    q: String,
}

#[get("/search")]
pub async fn search(staff: Staff, q: Query<SearchQuery>) -> Response {
    let query = q.q.trim().to_string();
    let (page, page_size) = q.page.resolve(LIST_PAGE_SIZE);
    let (lots, pager) = if query.is_empty() {
        (Vec::new(), None)
    } else {
        let result = staff.service.search_lots(&query, page, page_size).await?;
        let pager = Pager::new(&result, "/search", &[("q", query.clone())], page_size);
        (result.items, Some(pager))
    };
    render_template(SearchPage {
        user: staff.page_user(),
        query,
        lots,
        pager,
    })
}

#[derive(Deserialize)]
struct ItemQuery {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    q: Option<String>,
}

/// Jumps to the shell deep link of a business item id.
#[get("/search/item")]
pub async fn search_item(staff: Staff, session: Session, q: Query<ItemQuery>) -> Response {
    let Some(item) = q.into_inner().q else {
        return Ok(see_other("/"));
    };
    let toast = match staff.service.resolve_item(&item).await {
        Ok(Some(resolved)) => {
            let query = serde_urlencoded::to_string([
                ("seller", resolved.seller_display_id.unwrap_or_default()),
                ("event", resolved.customer_catalog_id),
                ("item", resolved.customer_item_id),
            ])
            .map_err(anyhow::Error::new)?;
            return Ok(see_other(&format!("/?{query}")));
        }
        Ok(None) => Toast::new("warning", format!("Item {item} not found")),
        Err(err) => {
            log::warn!("Unable to resolve item {item}: {err}");
            Toast::new("error", format!("Could not look up item {item}"))
        }
    };
    session
        .insert(PENDING_TOAST, toast)
        .log_error("Unable to store pending toast");
    Ok(see_other("/"))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(access::controllers::login_page)
        .service(access::controllers::log_in)
        .service(access::controllers::log_out)
        .service(access::controllers::no_access)
        .service(index)
        .service(sellers)
        .service(seller_detail)
        .service(event_detail)
        .service(lot_detail)
        .service(override_page)
        .service(save_override)
        .service(search)
        .service(search_item)
        .service(panels::sellers_panel)
        .service(panels::seller_events_panel)
        .service(panels::event_lots_panel)
        .service(panels::lot_detail_panel)
        .service(panels::save_lot_detail_panel)
        .service(panels::lot_override_panel)
        .service(recovery::controllers::recovery_dashboard)
        .service(recovery::controllers::recovery_check)
        .service(recovery::controllers::recovery_retry)
        .service(recovery::controllers::recovery_skip)
        .service(recovery::controllers::recovery_clear)
        .service(import::controllers::import_list)
        .service(import::controllers::import_file)
        .service(import::controllers::upload_catalog)
        .default_service(web::to(not_found));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use actix_web::{http::StatusCode, test};

    #[actix_web::test]
    async fn exempt_paths() {
        assert!(is_exempt("/login"));
        assert!(is_exempt("/static/app.css"));
        assert!(is_exempt("/no-access"));
        assert!(!is_exempt("/loginx"));
        assert!(!is_exempt("/"));
        assert!(!is_exempt("/imports"));
    }

    #[actix_web::test]
    async fn api_errors_map_to_responses() {
        assert!(matches!(
            ControllerError::from(ApiError::Auth("expired".into())),
            ControllerError::Unauthorized
        ));
        let not_found = ControllerError::from(ApiError::Status {
            status: 404,
            body: String::new(),
        });
        assert_eq!(
            actix_web::ResponseError::error_response(&not_found).status(),
            StatusCode::NOT_FOUND
        );
        let upstream = ControllerError::from(ApiError::Status {
            status: 500,
            body: "boom".into(),
        });
        assert_eq!(
            actix_web::ResponseError::error_response(&upstream).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[actix_web::test]
    async fn undecodable_form_is_invalid_input() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let cookie = login(&app).await;
        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/imports/run")
                .cookie(cookie)
                .insert_header(("Content-Type", "application/json"))
                .set_payload(r#"{"filename":"spring.csv"}"#)
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(res).await.starts_with("form\n"));
    }

    #[actix_web::test]
    async fn invalid_input_renders_field_and_message() {
        let err = ControllerError::InvalidInput {
            field: "filename".to_string(),
            msg: "must not be empty".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid field filename");
        let res = actix_web::ResponseError::error_response(&err);
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn anonymous_requests_go_to_login() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let res = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/login");

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/panels/sellers")
                .insert_header(("HX-Request", "true"))
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get("HX-Redirect").and_then(|v| v.to_str().ok()),
            Some("/login")
        );
    }

    #[actix_web::test]
    async fn shell_renders_for_staff() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let cookie = login(&app).await;
        let res =
            test::call_service(&app, test::TestRequest::get().uri("/").cookie(cookie).to_request())
                .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_text(res).await;
        assert!(body.contains("/panels/sellers"));
    }

    #[actix_web::test]
    async fn deep_link_preloads_panels() {
        let env = TestEnv::new();
        let house = seller(7, "Heritage House", "1874");
        env.api.add_seller(house.clone());
        env.api
            .add_catalog(catalog(42, "405438", "Spring", &house, future_date()));
        let app = test::init_service(env.app()).await;
        let cookie = login(&app).await;
        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/?seller=1874&event=405438")
                .cookie(cookie)
                .to_request(),
        )
        .await;
        let body = body_text(res).await;
        assert!(body.contains("/panels/sellers/7/events"));
        assert!(body.contains("/panels/events/42/lots"));
    }

    #[actix_web::test]
    async fn item_search_redirects_to_deep_link() {
        let env = TestEnv::new();
        let house = seller(7, "Heritage House", "1874");
        env.api.add_seller(house.clone());
        env.api
            .add_catalog(catalog(42, "405438", "Spring", &house, future_date()));
        env.api
            .add_lot(lot(100, "2100000000", 42, "3", lot_data(1, 10.)));
        let app = test::init_service(env.app()).await;
        let cookie = login(&app).await;

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/search/item?q=2100000000")
                .cookie(cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        let to = location(&res);
        assert!(to.contains("seller=1874"));
        assert!(to.contains("event=405438"));
        assert!(to.contains("item=2100000000"));

        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/search/item")
                .cookie(cookie.clone())
                .to_request(),
        )
        .await;
        assert_eq!(location(&res), "/");
    }

    #[actix_web::test]
    async fn unknown_item_leaves_a_toast() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let cookie = login(&app).await;
        let res = test::call_service(
            &app,
            test::TestRequest::get()
                .uri("/search/item?q=INVALID")
                .cookie(cookie)
                .to_request(),
        )
        .await;
        assert_eq!(location(&res), "/");
        let cookie = session_cookie(&res).expect("session updated");
        let res =
            test::call_service(&app, test::TestRequest::get().uri("/").cookie(cookie).to_request())
                .await;
        let body = body_text(res).await;
        assert!(body.contains("Item INVALID not found"));
    }

    #[actix_web::test]
    async fn override_form_round_trip() {
        let env = TestEnv::new();
        let house = seller(7, "Heritage House", "1874");
        env.api.add_seller(house.clone());
        env.api
            .add_catalog(catalog(42, "405438", "Spring", &house, future_date()));
        env.api.add_lot(lot(100, "A", 42, "1", lot_data(1, 10.)));
        let app = test::init_service(env.app()).await;
        let cookie = login(&app).await;

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/lots/100/override")
                .cookie(cookie.clone())
                .set_form([("qty", "4"), ("l", "12.5")])
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&res), "/lots/100");
        let saved = env.api.lot_by_item("A").expect("lot");
        let over = saved.override_data().expect("override written");
        assert_eq!(over.qty, Some(4));
        assert_eq!(over.l, Some(12.5));

        let res = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/lots/100/override")
                .cookie(cookie)
                .set_form([("l", "1.999")])
                .to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body_text(res).await.contains("decimal places"));
    }

    #[actix_web::test]
    async fn unreachable_api_renders_bad_gateway() {
        let env = TestEnv::new();
        let app = test::init_service(env.app()).await;
        let cookie = login(&app).await;
        env.api
            .unreachable
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let res = test::call_service(
            &app,
            test::TestRequest::get().uri("/sellers").cookie(cookie).to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert!(body_text(res)
            .await
            .contains("Unable to reach the Catalog API"));
    }
}
