//! In-process stand-ins for the remote catalog API.

use anyhow::anyhow;
use async_trait::async_trait;
use catalog_api::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

use crate::access::{AccessPolicy, StaffAccessPolicy};
use crate::cache::{MemoryCache, SafeCache};
use crate::catalog::CatalogService;
use crate::config::Settings;
use crate::control::{configure, form_config, StaffGuard};
use crate::import::controllers::upload_config;
use crate::pagination::paginate;
use crate::recovery::{MergeOperation, RecoveryEntry};
use actix_http::Request;
use actix_session::{storage::CookieSessionStore, Session, SessionMiddleware};
use actix_web::body::MessageBody;
use actix_web::cookie::{Cookie, Key};
use actix_web::dev::{Service, ServiceFactory, ServiceRequest, ServiceResponse};
use actix_web::web::{self, Data};
use actix_web::{test, App, HttpResponse};
use std::collections::HashMap;

pub fn lot_data(qty: i64, l: f64) -> LotData {
    LotData {
        qty: Some(qty),
        l: Some(l),
        w: Some(5.),
        h: Some(5.),
        wgt: Some(2.),
        cpack: Some("3".to_string()),
        force_crate: Some(false),
        ..Default::default()
    }
}

pub fn seller(id: i64, name: &str, display_id: &str) -> SellerDto {
    SellerDto {
        id,
        name: name.to_string(),
        customer_display_id: Some(display_id.to_string()),
        is_active: Some(true),
    }
}

pub fn catalog(
    id: i64,
    customer_catalog_id: &str,
    title: &str,
    seller: &SellerDto,
    start_date: OffsetDateTime,
) -> CatalogExpandedDto {
    CatalogExpandedDto {
        catalog: CatalogDto {
            id,
            title: title.to_string(),
            customer_catalog_id: Some(customer_catalog_id.to_string()),
            start_date: Some(start_date),
            end_date: Some(start_date + time::Duration::hours(1)),
            agent: Some("DLC".to_string()),
            is_completed: Some(false),
        },
        sellers: vec![seller.clone()],
        lots: vec![],
    }
}

pub fn lot(id: i64, item: &str, catalog_id: i64, lot_number: &str, data: LotData) -> LotDto {
    LotDto {
        id,
        customer_item_id: Some(item.to_string()),
        initial_data: Some(data),
        overriden_data: vec![],
        catalogs: vec![LotCatalog {
            catalog_id,
            lot_number: lot_number.to_string(),
        }],
        image_links: vec![ImageLink {
            link: format!("https://img.test/{item}.jpg"),
        }],
    }
}

fn not_found() -> ApiError {
    ApiError::Status {
        status: 404,
        body: "Not Found".to_string(),
    }
}

fn server_error() -> ApiError {
    ApiError::Status {
        status: 500,
        body: "boom".to_string(),
    }
}

#[derive(Default)]
pub struct FakeCatalogApi {
    pub sellers: Mutex<Vec<SellerDto>>,
    pub catalogs: Mutex<Vec<CatalogExpandedDto>>,
    pub lots: Mutex<Vec<LotDto>>,
    pub calls: Mutex<Vec<String>>,
    pub bulk_inserts: Mutex<Vec<BulkInsertRequest>>,
    pub updates: Mutex<Vec<(i64, UpdateLotRequest)>>,
    /// Item ids whose create call fails.
    pub fail_create: Mutex<HashSet<String>>,
    pub fail_get_lot: Mutex<HashSet<i64>>,
    pub fail_writes: AtomicBool,
    pub unreachable: AtomicBool,
    next_id: AtomicI64,
}

impl FakeCatalogApi {
    pub fn new() -> Arc<Self> {
        let api = Self::default();
        api.next_id.store(1000, Ordering::SeqCst);
        Arc::new(api)
    }

    pub fn add_seller(&self, seller: SellerDto) {
        self.sellers.lock().expect("lock").push(seller);
    }

    pub fn add_catalog(&self, catalog: CatalogExpandedDto) {
        self.catalogs.lock().expect("lock").push(catalog);
    }

    pub fn add_lot(&self, lot: LotDto) {
        self.lots.lock().expect("lock").push(lot);
    }

    pub fn lot_by_item(&self, item: &str) -> Option<LotDto> {
        self.lots
            .lock()
            .expect("lock")
            .iter()
            .find(|l| l.customer_item_id.as_deref() == Some(item))
            .cloned()
    }

    pub fn calls(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) -> Result<(), ApiError> {
        self.calls.lock().expect("lock").push(call);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ApiError::Transport(reqwest_middleware::Error::Middleware(
                anyhow!("connection refused"),
            )));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), ApiError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(server_error());
        }
        Ok(())
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn customer_catalog_id_of(&self, catalog_id: i64) -> Option<String> {
        self.catalogs
            .lock()
            .expect("lock")
            .iter()
            .find(|c| c.catalog.id == catalog_id)
            .and_then(|c| c.catalog.customer_catalog_id.clone())
    }
}

#[async_trait]
impl CatalogApi for FakeCatalogApi {
    async fn list_sellers(&self, query: &SellerQuery) -> Result<PaginatedList<SellerDto>, ApiError> {
        self.record("list_sellers".to_string())?;
        let sellers: Vec<_> = self
            .sellers
            .lock()
            .expect("lock")
            .iter()
            .filter(|s| {
                query
                    .name
                    .as_ref()
                    .map_or(true, |n| s.name.to_lowercase().contains(&n.to_lowercase()))
            })
            .filter(|s| {
                query
                    .customer_display_id
                    .as_ref()
                    .map_or(true, |d| s.customer_display_id.as_ref() == Some(d))
            })
            .cloned()
            .collect();
        Ok(paginate(sellers, query.page_number, query.page_size))
    }

    async fn get_seller(&self, id: i64) -> Result<SellerDto, ApiError> {
        self.record(format!("get_seller:{id}"))?;
        self.sellers
            .lock()
            .expect("lock")
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn list_catalogs(
        &self,
        query: &CatalogQuery,
    ) -> Result<PaginatedList<CatalogDto>, ApiError> {
        self.record("list_catalogs".to_string())?;
        let catalogs: Vec<_> = self
            .catalogs
            .lock()
            .expect("lock")
            .iter()
            .filter(|c| {
                query
                    .seller_ids
                    .map_or(true, |id| c.sellers.iter().any(|s| s.id == id))
            })
            .filter(|c| {
                query
                    .customer_catalog_id
                    .as_ref()
                    .map_or(true, |id| c.catalog.customer_catalog_id.as_ref() == Some(id))
            })
            .filter(|c| {
                query
                    .title
                    .as_ref()
                    .map_or(true, |t| c.catalog.title.contains(t.as_str()))
            })
            .map(|c| c.catalog.clone())
            .collect();
        Ok(paginate(catalogs, query.page_number, query.page_size))
    }

    async fn get_catalog(&self, id: i64) -> Result<CatalogExpandedDto, ApiError> {
        self.record(format!("get_catalog:{id}"))?;
        let mut catalog = self
            .catalogs
            .lock()
            .expect("lock")
            .iter()
            .find(|c| c.catalog.id == id)
            .cloned()
            .ok_or_else(not_found)?;
        catalog.lots = self
            .lots
            .lock()
            .expect("lock")
            .iter()
            .filter(|l| l.catalog_id() == Some(id))
            .map(|l| LotCatalogInformation {
                id: l.id,
                lot_number: l.lot_number().to_string(),
            })
            .collect();
        Ok(catalog)
    }

    async fn list_lots(&self, query: &LotQuery) -> Result<PaginatedList<LotDto>, ApiError> {
        self.record("list_lots".to_string())?;
        let lots: Vec<_> = self.lots.lock().expect("lock").clone();
        let lots: Vec<_> = lots
            .into_iter()
            .filter(|l| {
                query.customer_catalog_id.as_ref().map_or(true, |id| {
                    l.catalog_id()
                        .and_then(|c| self.customer_catalog_id_of(c))
                        .as_ref()
                        == Some(id)
                })
            })
            .filter(|l| {
                query
                    .customer_item_id
                    .as_ref()
                    .map_or(true, |id| l.customer_item_id.as_ref() == Some(id))
            })
            .filter(|l| {
                query
                    .lot_number
                    .as_ref()
                    .map_or(true, |n| l.lot_number() == n)
            })
            .collect();
        Ok(paginate(lots, query.page_number, query.page_size))
    }

    async fn get_lot(&self, id: i64) -> Result<LotDto, ApiError> {
        self.record(format!("get_lot:{id}"))?;
        if self.fail_get_lot.lock().expect("lock").contains(&id) {
            return Err(server_error());
        }
        self.lots
            .lock()
            .expect("lock")
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn create_lot(&self, request: &AddLotRequest) -> Result<(), ApiError> {
        self.record(format!("create_lot:{}", request.customer_item_id))?;
        self.check_write()?;
        if self
            .fail_create
            .lock()
            .expect("lock")
            .contains(&request.customer_item_id)
        {
            return Err(server_error());
        }
        let id = self.next_id();
        self.add_lot(LotDto {
            id,
            customer_item_id: Some(request.customer_item_id.clone()),
            initial_data: Some(request.initial_data.clone()),
            overriden_data: request.overriden_data.clone(),
            catalogs: request.catalogs.clone(),
            image_links: request
                .image_links
                .iter()
                .map(|link| ImageLink { link: link.clone() })
                .collect(),
        });
        Ok(())
    }

    async fn update_lot(&self, id: i64, request: &UpdateLotRequest) -> Result<(), ApiError> {
        self.record(format!("update_lot:{id}"))?;
        self.check_write()?;
        let mut lots = self.lots.lock().expect("lock");
        let lot = lots.iter_mut().find(|l| l.id == id).ok_or_else(not_found)?;
        lot.overriden_data = request.overriden_data.clone();
        lot.catalogs = request.catalogs.clone();
        self.updates
            .lock()
            .expect("lock")
            .push((id, request.clone()));
        Ok(())
    }

    async fn delete_lot(&self, id: i64) -> Result<(), ApiError> {
        self.record(format!("delete_lot:{id}"))?;
        self.check_write()?;
        let mut lots = self.lots.lock().expect("lock");
        let before = lots.len();
        lots.retain(|l| l.id != id);
        if lots.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    async fn bulk_insert(&self, request: &BulkInsertRequest) -> Result<(), ApiError> {
        self.record("bulk_insert".to_string())?;
        self.check_write()?;
        for c in &request.catalogs {
            let mut sellers = vec![];
            for s in &c.sellers {
                let display_id = s.customer_display_id.to_string();
                let existing = self
                    .sellers
                    .lock()
                    .expect("lock")
                    .iter()
                    .find(|x| x.customer_display_id.as_deref() == Some(display_id.as_str()))
                    .cloned();
                let seller = match existing {
                    Some(seller) => seller,
                    None => {
                        let seller = SellerDto {
                            id: self.next_id(),
                            name: s.name.clone().unwrap_or_default(),
                            customer_display_id: Some(display_id),
                            is_active: Some(s.is_active),
                        };
                        self.add_seller(seller.clone());
                        seller
                    }
                };
                sellers.push(seller);
            }
            let catalog_id = self.next_id();
            self.add_catalog(CatalogExpandedDto {
                catalog: CatalogDto {
                    id: catalog_id,
                    title: c.title.clone(),
                    customer_catalog_id: Some(c.customer_catalog_id.clone()),
                    start_date: Some(c.start_date),
                    end_date: Some(c.end_date),
                    agent: Some(c.agent.clone()),
                    is_completed: Some(false),
                },
                sellers,
                lots: vec![],
            });
            for l in &c.lots {
                let id = self.next_id();
                self.add_lot(LotDto {
                    id,
                    customer_item_id: Some(l.customer_item_id.clone()),
                    initial_data: Some(l.initial_data.clone()),
                    overriden_data: l.overriden_data.clone(),
                    catalogs: vec![LotCatalog {
                        catalog_id,
                        lot_number: l.lot_number.clone(),
                    }],
                    image_links: vec![],
                });
            }
        }
        self.bulk_inserts
            .lock()
            .expect("lock")
            .push(request.clone());
        Ok(())
    }
}

/// Accepts password `secret` for any user and hands out the shared fake.
pub struct FakeConnector {
    pub api: Arc<FakeCatalogApi>,
    pub refreshed: AtomicBool,
}

impl FakeConnector {
    pub fn new(api: Arc<FakeCatalogApi>) -> Arc<Self> {
        Arc::new(Self {
            api,
            refreshed: AtomicBool::new(false),
        })
    }

    pub fn token(valid_for: time::Duration) -> AccessToken {
        AccessToken {
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: OffsetDateTime::now_utc() + valid_for,
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn authenticate(&self, _username: &str, password: &str) -> Result<AccessToken, ApiError> {
        if password == "secret" {
            Ok(Self::token(time::Duration::hours(1)))
        } else {
            Err(ApiError::Auth("invalid credentials".to_string()))
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, ApiError> {
        if refresh_token == "refresh" {
            self.refreshed.store(true, Ordering::SeqCst);
            Ok(Self::token(time::Duration::hours(1)))
        } else {
            Err(ApiError::Auth("invalid refresh token".to_string()))
        }
    }

    fn connect(&self, _token: &AccessToken) -> Arc<dyn CatalogApi> {
        self.api.clone()
    }
}

pub fn memory_cache() -> SafeCache {
    SafeCache::new(Arc::new(MemoryCache::new()))
}

pub fn service(api: Arc<FakeCatalogApi>, cache: SafeCache) -> CatalogService {
    CatalogService::new(api, cache, 4)
}

pub fn future_date() -> OffsetDateTime {
    OffsetDateTime::now_utc() + time::Duration::days(30)
}

/// A full application over the fakes, wired the way `main` wires it.
pub struct TestEnv {
    pub api: Arc<FakeCatalogApi>,
    pub connector: Arc<FakeConnector>,
    pub cache: SafeCache,
    pub settings: Settings,
    key: Key,
}

impl TestEnv {
    pub fn new() -> Self {
        let api = FakeCatalogApi::new();
        Self {
            connector: FakeConnector::new(api.clone()),
            api,
            cache: memory_cache(),
            settings: Settings {
                fetch_workers: 4,
                ..Default::default()
            },
            key: Key::generate(),
        }
    }

    pub fn with_import_dir(mut self, dir: &std::path::Path) -> Self {
        self.settings.import_files_dir = dir.to_path_buf();
        self
    }

    pub fn app(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody>,
            Error = actix_web::Error,
            InitError = (),
        >,
    > {
        let connector: Arc<dyn Connector> = self.connector.clone();
        let policy: Arc<dyn AccessPolicy> = Arc::new(StaffAccessPolicy);
        App::new()
            .app_data(form_config())
            .app_data(upload_config())
            .app_data(Data::from(connector))
            .app_data(Data::from(policy))
            .app_data(Data::new(self.cache.clone()))
            .app_data(Data::new(self.settings.clone()))
            .wrap(StaffGuard)
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), self.key.clone())
                    .cookie_secure(false)
                    .build(),
            )
            .route("/static/test-session", web::post().to(seed_session))
            .configure(configure)
    }
}

async fn seed_session(
    session: Session,
    values: web::Json<HashMap<String, serde_json::Value>>,
) -> HttpResponse {
    for (key, value) in values.into_inner() {
        session.insert(key, value).expect("session insert");
    }
    HttpResponse::Ok().finish()
}

pub fn location<B>(res: &ServiceResponse<B>) -> String {
    res.headers()
        .get("Location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn session_cookie<B>(res: &ServiceResponse<B>) -> Option<Cookie<'static>> {
    res.response()
        .cookies()
        .find(|c| c.name() == "id")
        .map(|c| c.into_owned())
}

pub async fn body_text<B: MessageBody>(res: ServiceResponse<B>) -> String {
    String::from_utf8(test::read_body(res).await.to_vec()).expect("utf-8 body")
}

/// Signs in as `alice` and returns the session cookie.
pub async fn login<S, B>(app: &S) -> Cookie<'static>
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let res = test::call_service(
        app,
        test::TestRequest::post()
            .uri("/login")
            .set_form([("username", "alice"), ("password", "secret")])
            .to_request(),
    )
    .await;
    assert_eq!(location(&res), "/");
    session_cookie(&res).expect("session cookie")
}

/// A session holding exactly `values`, for states the login form never
/// produces.
pub async fn session_with<S, B>(app: &S, values: &[(&str, serde_json::Value)]) -> Cookie<'static>
where
    S: Service<Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let values: HashMap<&str, &serde_json::Value> = values.iter().map(|(k, v)| (*k, v)).collect();
    let res = test::call_service(
        app,
        test::TestRequest::post()
            .uri("/static/test-session")
            .set_json(values)
            .to_request(),
    )
    .await;
    session_cookie(&res).expect("session cookie")
}

pub fn recovery_entry(item: &str) -> RecoveryEntry {
    RecoveryEntry {
        customer_item_id: item.to_string(),
        lot_number: "1".to_string(),
        catalog_id: 42,
        customer_catalog_id: "405438".to_string(),
        seller_display_id: "1874".to_string(),
        operation: MergeOperation::Update,
        add_lot_request: AddLotRequest {
            customer_item_id: item.to_string(),
            image_links: vec![],
            initial_data: lot_data(1, 10.),
            overriden_data: vec![],
            catalogs: vec![LotCatalog {
                catalog_id: 42,
                lot_number: "1".to_string(),
            }],
        },
        error_message: "server error".to_string(),
        timestamp: OffsetDateTime::now_utc(),
    }
}
