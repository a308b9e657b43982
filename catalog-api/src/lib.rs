//! Client for the remote catalog API: sellers, catalogs (events) and lots.

pub mod client;
pub mod error;
pub mod model;

pub use client::{HttpCatalogClient, HttpConnector};
pub use error::ApiError;
pub use model::*;

use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn list_sellers(&self, query: &SellerQuery) -> Result<PaginatedList<SellerDto>, ApiError>;
    async fn get_seller(&self, id: i64) -> Result<SellerDto, ApiError>;
    async fn list_catalogs(&self, query: &CatalogQuery)
        -> Result<PaginatedList<CatalogDto>, ApiError>;
    async fn get_catalog(&self, id: i64) -> Result<CatalogExpandedDto, ApiError>;
    async fn list_lots(&self, query: &LotQuery) -> Result<PaginatedList<LotDto>, ApiError>;
    async fn get_lot(&self, id: i64) -> Result<LotDto, ApiError>;
    async fn create_lot(&self, request: &AddLotRequest) -> Result<(), ApiError>;
    /// Rewrites the override layer of a lot. Initial data cannot be changed.
    async fn update_lot(&self, id: i64, request: &UpdateLotRequest) -> Result<(), ApiError>;
    async fn delete_lot(&self, id: i64) -> Result<(), ApiError>;
    async fn bulk_insert(&self, request: &BulkInsertRequest) -> Result<(), ApiError>;
}

/// Token lifecycle. One connector is shared by the whole process; each
/// signed-in user gets a [`CatalogApi`] bound to their own token.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AccessToken, ApiError>;
    async fn refresh(&self, refresh_token: &str) -> Result<AccessToken, ApiError>;
    fn connect(&self, token: &AccessToken) -> Arc<dyn CatalogApi>;
}
