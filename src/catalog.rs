use catalog_api::{
    AddLotRequest, ApiError, BulkInsertRequest, CatalogApi, CatalogDto, CatalogExpandedDto,
    CatalogQuery, LotData, LotDto, LotQuery, PaginatedList, SellerDto, SellerQuery,
    UpdateLotRequest,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;

use crate::cache::SafeCache;
use crate::pagination::paginate;

pub const SELLERS_CACHE_KEY: &str = "sellers_all";
pub const DEFAULT_FETCH_WORKERS: usize = 10;
const SELLERS_PAGE_SIZE: u32 = 500;
const SELLER_CATALOGS_PAGE_SIZE: u32 = 200;
const LOTS_PAGE_SIZE: u32 = 100;

pub fn seller_catalogs_key(seller_id: i64) -> String {
    format!("catalogs_seller_{seller_id}")
}

pub fn catalog_key(catalog_id: i64) -> String {
    format!("catalog_{catalog_id}")
}

pub fn lot_key(lot_id: i64) -> String {
    format!("lot_{lot_id}")
}

/// Where a business item key lives: enough to deep-link straight to its row.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResolvedItem {
    pub customer_item_id: String,
    pub lot_id: i64,
    pub catalog_id: i64,
    pub customer_catalog_id: String,
    pub seller_display_id: Option<String>,
    pub lot_position: usize,
}

/// Remote catalog access for one signed-in user, with the shared cache in
/// front of the read paths.
#[derive(Clone)]
pub struct CatalogService {
    api: Arc<dyn CatalogApi>,
    cache: SafeCache,
    fetch_workers: usize,
}

impl CatalogService {
    pub fn new(api: Arc<dyn CatalogApi>, cache: SafeCache, fetch_workers: usize) -> Self {
        Self {
            api,
            cache,
            fetch_workers: fetch_workers.max(1),
        }
    }

    pub fn api(&self) -> &Arc<dyn CatalogApi> {
        &self.api
    }

    pub fn cache(&self) -> &SafeCache {
        &self.cache
    }

    /// Unfiltered listings are served from a cached projection of every
    /// seller. Filtered ones always hit the API.
    pub async fn list_sellers(
        &self,
        query: SellerQuery,
    ) -> Result<PaginatedList<SellerDto>, ApiError> {
        if query.has_filters() {
            return self.api.list_sellers(&query).await;
        }
        let all = match self.cache.get::<Vec<SellerDto>>(SELLERS_CACHE_KEY).await {
            Some(all) => all,
            None => {
                let all: Vec<SellerDto> = self
                    .api
                    .list_sellers(&SellerQuery::page(1, SELLERS_PAGE_SIZE))
                    .await?
                    .items
                    .into_iter()
                    .map(|s| SellerDto {
                        is_active: None,
                        ..s
                    })
                    .collect();
                self.cache.set(SELLERS_CACHE_KEY, &all, None).await;
                all
            }
        };
        Ok(paginate(all, query.page_number, query.page_size))
    }

    pub async fn get_seller(&self, seller_id: i64) -> Result<SellerDto, ApiError> {
        self.api.get_seller(seller_id).await
    }

    pub async fn find_seller_by_display_id(
        &self,
        display_id: &str,
    ) -> Result<Option<SellerDto>, ApiError> {
        let query = SellerQuery {
            customer_display_id: Some(display_id.to_string()),
            ..SellerQuery::page(1, 1)
        };
        Ok(self.api.list_sellers(&query).await?.items.into_iter().next())
    }

    /// Events of one seller come from a cached projection of all of that
    /// seller's events. `future_only` keeps events starting today or later.
    pub async fn list_catalogs(
        &self,
        query: CatalogQuery,
        use_cache: bool,
        future_only: bool,
    ) -> Result<PaginatedList<CatalogDto>, ApiError> {
        let seller_id = match query.seller_ids {
            Some(seller_id) if !query.has_filters() => seller_id,
            _ => return self.api.list_catalogs(&query).await,
        };
        let key = seller_catalogs_key(seller_id);
        let cached = if use_cache {
            self.cache.get::<Vec<CatalogDto>>(&key).await
        } else {
            None
        };
        let all = match cached {
            Some(all) => all,
            None => {
                let request = CatalogQuery {
                    seller_ids: Some(seller_id),
                    ..CatalogQuery::page(1, SELLER_CATALOGS_PAGE_SIZE)
                };
                let all: Vec<CatalogDto> = self
                    .api
                    .list_catalogs(&request)
                    .await?
                    .items
                    .into_iter()
                    .map(|c| CatalogDto {
                        end_date: None,
                        agent: None,
                        is_completed: None,
                        ..c
                    })
                    .collect();
                self.cache.set(&key, &all, None).await;
                all
            }
        };
        let items = if future_only {
            let today = OffsetDateTime::now_utc().date();
            all.into_iter()
                .filter(|c| c.start_date.is_some_and(|d| d.date() >= today))
                .collect()
        } else {
            all
        };
        Ok(paginate(items, query.page_number, query.page_size))
    }

    pub async fn get_catalog(&self, catalog_id: i64) -> Result<CatalogExpandedDto, ApiError> {
        let key = catalog_key(catalog_id);
        if let Some(catalog) = self.cache.get(&key).await {
            return Ok(catalog);
        }
        let catalog = self.api.get_catalog(catalog_id).await?;
        self.cache.set(&key, &catalog, None).await;
        Ok(catalog)
    }

    pub async fn get_lot(&self, lot_id: i64) -> Result<LotDto, ApiError> {
        let key = lot_key(lot_id);
        if let Some(lot) = self.cache.get(&key).await {
            return Ok(lot);
        }
        let lot = self.api.get_lot(lot_id).await?;
        self.cache.set(&key, &lot, None).await;
        Ok(lot)
    }

    /// Full records for the given lot ids, in input order.
    ///
    /// Cached lots are served without a network call. The rest are fetched
    /// concurrently, at most `fetch_workers` at a time. A lot that fails to
    /// load is logged and left out, so the result can be shorter than the
    /// input.
    pub async fn get_lots_for_event(&self, lot_ids: &[i64]) -> Vec<LotDto> {
        if lot_ids.is_empty() {
            return vec![];
        }
        let mut slots: Vec<Option<LotDto>> = Vec::with_capacity(lot_ids.len());
        let mut missing = vec![];
        for (idx, id) in lot_ids.iter().copied().enumerate() {
            let cached = self.cache.get::<LotDto>(&lot_key(id)).await;
            if cached.is_none() {
                missing.push((idx, id));
            }
            slots.push(cached);
        }
        if missing.is_empty() {
            return slots.into_iter().flatten().collect();
        }

        let api = &self.api;
        let mut fetched = stream::iter(missing)
            .map(|(idx, id)| async move { (idx, id, api.get_lot(id).await) })
            .buffer_unordered(self.fetch_workers);
        while let Some((idx, id, res)) = fetched.next().await {
            match res {
                Ok(lot) => {
                    self.cache.set(&lot_key(id), &lot, None).await;
                    slots[idx] = Some(lot);
                }
                Err(err) => log::warn!("Unable to fetch lot {id}: {err}"),
            }
        }
        slots.into_iter().flatten().collect()
    }

    /// Every lot of an event, following pagination to the end.
    pub async fn fetch_all_lots(&self, customer_catalog_id: &str) -> Result<Vec<LotDto>, ApiError> {
        let mut lots = vec![];
        let mut page = 1;
        loop {
            let query = LotQuery {
                customer_catalog_id: Some(customer_catalog_id.to_string()),
                ..LotQuery::page(page, LOTS_PAGE_SIZE)
            };
            let mut result = self.api.list_lots(&query).await?;
            lots.append(&mut result.items);
            if !result.has_next_page {
                break;
            }
            page += 1;
        }
        Ok(lots)
    }

    /// Writes a staff correction. Values the input leaves unset keep whatever
    /// the existing override holds.
    pub async fn save_lot_override(&self, lot_id: i64, input: &LotData) -> Result<(), ApiError> {
        let lot = self.api.get_lot(lot_id).await?;
        let mut merged = lot.override_data().cloned().unwrap_or_default();
        merged.overlay(input);
        let request = UpdateLotRequest {
            customer_item_id: lot.customer_item_id.clone(),
            image_links: lot.image_urls(),
            overriden_data: vec![merged],
            catalogs: lot.catalogs.clone(),
        };
        self.api.update_lot(lot_id, &request).await?;
        self.invalidate_lot(lot_id).await;
        Ok(())
    }

    pub async fn find_catalog_by_customer_id(
        &self,
        customer_catalog_id: &str,
    ) -> Result<Option<i64>, ApiError> {
        let query = CatalogQuery {
            customer_catalog_id: Some(customer_catalog_id.to_string()),
            ..CatalogQuery::page(1, 1)
        };
        Ok(self
            .api
            .list_catalogs(&query)
            .await?
            .items
            .first()
            .map(|c| c.id))
    }

    pub async fn find_lot_by_item(&self, customer_item_id: &str) -> Result<Option<LotDto>, ApiError> {
        Ok(self
            .api
            .list_lots(&LotQuery::by_item(customer_item_id))
            .await?
            .items
            .into_iter()
            .next())
    }

    pub async fn bulk_insert(&self, request: &BulkInsertRequest) -> Result<(), ApiError> {
        self.api.bulk_insert(request).await?;
        self.cache.delete(SELLERS_CACHE_KEY).await;
        Ok(())
    }

    pub async fn create_lot(&self, request: &AddLotRequest) -> Result<(), ApiError> {
        self.api.create_lot(request).await
    }

    pub async fn delete_lot(&self, lot_id: i64) -> Result<(), ApiError> {
        self.api.delete_lot(lot_id).await?;
        self.invalidate_lot(lot_id).await;
        Ok(())
    }

    pub async fn invalidate_lot(&self, lot_id: i64) {
        self.cache.delete(&lot_key(lot_id)).await;
    }

    pub async fn invalidate_catalog(&self, catalog_id: i64) {
        self.cache.delete(&catalog_key(catalog_id)).await;
    }

    pub async fn invalidate_seller_catalogs(&self, seller_id: i64) {
        self.cache.delete(&seller_catalogs_key(seller_id)).await;
    }

    /// Lots whose item id or lot number equals `query`, without duplicates.
    pub async fn search_lots(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<PaginatedList<LotDto>, ApiError> {
        let by_item = LotQuery {
            customer_item_id: Some(query.to_string()),
            ..LotQuery::page(page, page_size)
        };
        let by_number = LotQuery {
            lot_number: Some(query.to_string()),
            ..LotQuery::page(page, page_size)
        };
        let (by_item, by_number) = futures::try_join!(
            self.api.list_lots(&by_item),
            self.api.list_lots(&by_number)
        )?;
        let mut seen = HashSet::new();
        let items: Vec<LotDto> = by_item
            .items
            .into_iter()
            .chain(by_number.items)
            .filter(|lot| seen.insert(lot.id))
            .collect();
        Ok(PaginatedList {
            total_items: items.len() as u32,
            items,
            page_number: by_item.page_number,
            total_pages: by_item.total_pages,
            has_previous_page: by_item.has_previous_page,
            has_next_page: by_item.has_next_page,
        })
    }

    pub async fn resolve_item(
        &self,
        customer_item_id: &str,
    ) -> Result<Option<ResolvedItem>, ApiError> {
        let Some(lot) = self.find_lot_by_item(customer_item_id).await? else {
            return Ok(None);
        };
        let Some(catalog_id) = lot.catalog_id() else {
            return Ok(None);
        };
        let catalog = self.get_catalog(catalog_id).await?;
        Ok(Some(ResolvedItem {
            customer_item_id: customer_item_id.to_string(),
            lot_id: lot.id,
            catalog_id,
            customer_catalog_id: catalog.catalog.customer_catalog_id.clone().unwrap_or_default(),
            seller_display_id: catalog.seller_display_id().map(str::to_string),
            lot_position: catalog.lot_position(lot.id).unwrap_or(0),
        }))
    }
}
