use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

/// Shipping and descriptive data of a lot. Used both for the originally
/// imported layer (`initial_data`) and for staff corrections (`overriden_data`).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct LotData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qty: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wgt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_crate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noted_conditions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_not_tip: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commodity_id: Option<i64>,
}

impl LotData {
    /// Copies every value present in `other` over `self`, leaving fields
    /// that `other` does not set untouched.
    pub fn overlay(&mut self, other: &LotData) {
        fn put<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *target = Some(v.clone());
            }
        }
        put(&mut self.qty, &other.qty);
        put(&mut self.l, &other.l);
        put(&mut self.w, &other.w);
        put(&mut self.h, &other.h);
        put(&mut self.wgt, &other.wgt);
        put(&mut self.value, &other.value);
        put(&mut self.cpack, &other.cpack);
        put(&mut self.description, &other.description);
        put(&mut self.notes, &other.notes);
        put(&mut self.item_id, &other.item_id);
        put(&mut self.force_crate, &other.force_crate);
        put(&mut self.noted_conditions, &other.noted_conditions);
        put(&mut self.do_not_tip, &other.do_not_tip);
        put(&mut self.commodity_id, &other.commodity_id);
    }

    pub fn is_empty(&self) -> bool {
        self == &LotData::default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LotCatalog {
    pub catalog_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lot_number: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImageLink {
    pub link: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LotDto {
    pub id: i64,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub customer_item_id: Option<String>,
    #[serde(default)]
    pub initial_data: Option<LotData>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub overriden_data: Vec<LotData>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub catalogs: Vec<LotCatalog>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_links: Vec<ImageLink>,
}

impl LotDto {
    /// The staff correction layer. The API models it as a list but only the
    /// first element is ever used.
    pub fn override_data(&self) -> Option<&LotData> {
        self.overriden_data.first()
    }

    pub fn lot_number(&self) -> &str {
        self.catalogs
            .first()
            .map(|c| c.lot_number.as_str())
            .unwrap_or_default()
    }

    pub fn catalog_id(&self) -> Option<i64> {
        self.catalogs.first().map(|c| c.catalog_id)
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.image_links.iter().map(|i| i.link.clone()).collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SellerDto {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub customer_display_id: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDto {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub customer_catalog_id: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_date: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub end_date: Option<OffsetDateTime>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub is_completed: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LotCatalogInformation {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lot_number: String,
}

/// Single-event response: the event plus its sellers and the lightweight
/// list of every lot attached to it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogExpandedDto {
    #[serde(flatten)]
    pub catalog: CatalogDto,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sellers: Vec<SellerDto>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lots: Vec<LotCatalogInformation>,
}

impl CatalogExpandedDto {
    pub fn seller(&self) -> Option<&SellerDto> {
        self.sellers.first()
    }

    pub fn seller_display_id(&self) -> Option<&str> {
        self.seller().and_then(|s| s.customer_display_id.as_deref())
    }

    pub fn lot_position(&self, lot_id: i64) -> Option<usize> {
        self.lots.iter().position(|l| l.id == lot_id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    pub page_number: u32,
    pub total_pages: u32,
    pub total_items: u32,
    pub has_previous_page: bool,
    pub has_next_page: bool,
}

impl<T> PaginatedList<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedList<U> {
        PaginatedList {
            items: self.items.into_iter().map(f).collect(),
            page_number: self.page_number,
            total_pages: self.total_pages,
            total_items: self.total_items,
            has_previous_page: self.has_previous_page,
            has_next_page: self.has_next_page,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddLotRequest {
    pub customer_item_id: String,
    #[serde(default)]
    pub image_links: Vec<String>,
    pub initial_data: LotData,
    #[serde(default)]
    pub overriden_data: Vec<LotData>,
    #[serde(default)]
    pub catalogs: Vec<LotCatalog>,
}

/// The update endpoint only rewrites the override layer; initial data is
/// immutable once a lot exists.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLotRequest {
    pub customer_item_id: Option<String>,
    pub image_links: Vec<String>,
    pub overriden_data: Vec<LotData>,
    pub catalogs: Vec<LotCatalog>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkInsertSellerRequest {
    pub customer_display_id: i64,
    pub name: Option<String>,
    pub is_active: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkInsertLotRequest {
    pub customer_item_id: String,
    pub lot_number: String,
    pub initial_data: LotData,
    pub overriden_data: Vec<LotData>,
    pub image_links: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BulkInsertCatalogRequest {
    pub customer_catalog_id: String,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_date: OffsetDateTime,
    pub agent: String,
    pub sellers: Vec<BulkInsertSellerRequest>,
    pub lots: Vec<BulkInsertLotRequest>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct BulkInsertRequest {
    pub catalogs: Vec<BulkInsertCatalogRequest>,
}

impl BulkInsertRequest {
    pub fn lots(&self) -> impl Iterator<Item = &BulkInsertLotRequest> {
        self.catalogs.iter().flat_map(|c| c.lots.iter())
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SellerQuery {
    pub page_number: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_display_id: Option<String>,
}

impl SellerQuery {
    pub fn page(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
            ..Default::default()
        }
    }

    pub fn has_filters(&self) -> bool {
        self.name.is_some() || self.is_active.is_some() || self.customer_display_id.is_some()
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CatalogQuery {
    pub page_number: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_ids: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_catalog_id: Option<String>,
}

impl CatalogQuery {
    pub fn page(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
            ..Default::default()
        }
    }

    pub fn has_filters(&self) -> bool {
        self.title.is_some() || self.agent.is_some() || self.is_completed.is_some()
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LotQuery {
    pub page_number: u32,
    pub page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_catalog_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_item_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lot_number: Option<String>,
}

impl LotQuery {
    pub fn page(page_number: u32, page_size: u32) -> Self {
        Self {
            page_number,
            page_size,
            ..Default::default()
        }
    }

    pub fn by_item(customer_item_id: &str) -> Self {
        Self {
            customer_item_id: Some(customer_item_id.to_string()),
            ..Self::page(1, 1)
        }
    }
}

/// Bearer token issued by the catalog API.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl AccessToken {
    const EXPIRY_MARGIN: time::Duration = time::Duration::seconds(30);

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now + Self::EXPIRY_MARGIN >= self.expires_at
    }
}

#[derive(Deserialize, Debug)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

impl TokenResponse {
    pub(crate) fn into_token(self, now: OffsetDateTime) -> AccessToken {
        AccessToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: now + time::Duration::seconds(self.expires_in),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Business keys come back as strings from some endpoints and as numbers
/// from others.
fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Int(i64),
        Num(f64),
    }

    let v = Option::<StrOrNum>::deserialize(deserializer)?;
    Ok(v.map(|x| match x {
        StrOrNum::Str(s) => s,
        StrOrNum::Int(i) => i.to_string(),
        StrOrNum::Num(n) => n.to_string(),
    }))
}
