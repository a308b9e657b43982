use crate::model::*;
use crate::{ApiError, CatalogApi, Connector};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_TYPE};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

static DEFAULT_ACCEPT_ENCODING: &str = "br;q=1.0, gzip;q=0.6, deflate;q=0.4, *;q=0.2";

#[derive(Clone)]
struct Transport {
    base_url: Arc<str>,
    reads: ClientWithMiddleware,
    writes: ClientWithMiddleware,
}

impl Transport {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Builds authenticated [`HttpCatalogClient`]s against one API base URL.
///
/// Reads go through a transient-retry middleware. Mutations are sent once:
/// a create that timed out after reaching the server must not be replayed.
#[derive(Clone)]
pub struct HttpConnector {
    transport: Transport,
}

impl HttpConnector {
    pub fn new(base_url: &str, timeout: Duration, retries: u32) -> Result<Self, anyhow::Error> {
        url::Url::parse(base_url)?;
        let mut headers = HeaderMap::new();
        headers.append(
            ACCEPT_ENCODING,
            HeaderValue::from_static(DEFAULT_ACCEPT_ENCODING),
        );
        let client = reqwest::ClientBuilder::new()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .use_rustls_tls()
            .build()?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(retries);
        let reads = ClientBuilder::new(client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        let writes = ClientBuilder::new(client).build();
        Ok(Self {
            transport: Transport {
                base_url: base_url.into(),
                reads,
                writes,
            },
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<AccessToken, ApiError> {
        let response = self
            .transport
            .writes
            .post(self.transport.url("token"))
            .form(form)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(ApiError::Auth("invalid credentials".to_string()));
        }
        let response = check_status(response).await?;
        let token: TokenResponse = decode(response).await?;
        Ok(token.into_token(OffsetDateTime::now_utc()))
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AccessToken, ApiError> {
        self.token_request(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, ApiError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    fn connect(&self, token: &AccessToken) -> Arc<dyn CatalogApi> {
        Arc::new(HttpCatalogClient {
            transport: self.transport.clone(),
            token: token.access_token.clone(),
        })
    }
}

/// [`CatalogApi`] over HTTP, bound to one bearer token.
pub struct HttpCatalogClient {
    transport: Transport,
    token: String,
}

impl HttpCatalogClient {
    fn read(&self, path: &str) -> RequestBuilder {
        self.transport
            .reads
            .get(self.transport.url(path))
            .bearer_auth(&self.token)
    }

    fn write(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.transport
            .writes
            .request(method, self.transport.url(path))
            .bearer_auth(&self.token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.read(path).send().await?;
        decode(check_status(response).await?).await
    }

    async fn get_query<T: DeserializeOwned, Q: Serialize + Sync>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<T, ApiError> {
        let response = self.read(path).query(query).send().await?;
        decode(check_status(response).await?).await
    }

    async fn send_json<B: Serialize + Sync>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        let body = serde_json::to_vec(body)?;
        let response = self
            .write(method, path)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body: truncate_body(&body),
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 300;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogClient {
    async fn list_sellers(&self, query: &SellerQuery) -> Result<PaginatedList<SellerDto>, ApiError> {
        self.get_query("Sellers", query).await
    }

    async fn get_seller(&self, id: i64) -> Result<SellerDto, ApiError> {
        self.get(&format!("Sellers/{id}")).await
    }

    async fn list_catalogs(
        &self,
        query: &CatalogQuery,
    ) -> Result<PaginatedList<CatalogDto>, ApiError> {
        self.get_query("Catalogs", query).await
    }

    async fn get_catalog(&self, id: i64) -> Result<CatalogExpandedDto, ApiError> {
        self.get(&format!("Catalogs/{id}")).await
    }

    async fn list_lots(&self, query: &LotQuery) -> Result<PaginatedList<LotDto>, ApiError> {
        self.get_query("Lots", query).await
    }

    async fn get_lot(&self, id: i64) -> Result<LotDto, ApiError> {
        self.get(&format!("Lots/{id}")).await
    }

    async fn create_lot(&self, request: &AddLotRequest) -> Result<(), ApiError> {
        self.send_json(reqwest::Method::POST, "Lots", request).await
    }

    async fn update_lot(&self, id: i64, request: &UpdateLotRequest) -> Result<(), ApiError> {
        self.send_json(reqwest::Method::PUT, &format!("Lots/{id}"), request)
            .await
    }

    async fn delete_lot(&self, id: i64) -> Result<(), ApiError> {
        let response = self
            .write(reqwest::Method::DELETE, &format!("Lots/{id}"))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn bulk_insert(&self, request: &BulkInsertRequest) -> Result<(), ApiError> {
        self.send_json(reqwest::Method::POST, "Bulk/insert", request)
            .await
    }
}
