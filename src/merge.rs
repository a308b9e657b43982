//! Reconciliation of a re-uploaded catalog file against an event that
//! already exists on the server.

use catalog_api::{
    AddLotRequest, ApiError, BulkInsertLotRequest, BulkInsertRequest, LotCatalog, LotData, LotDto,
};
use derive_more::{Display, Error};
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::catalog::CatalogService;
use crate::recovery::{MergeOperation, RecoveryEntry, RecoveryStore};

#[derive(Debug, Display, Error)]
pub enum MergeError {
    #[display("All {failed} lots failed during merge. First error: {first_error}")]
    AllFailed {
        failed: usize,
        first_error: String,
    },
    #[display("Unable to read the existing event: {_0}")]
    Api(ApiError),
    #[display("Import contains no catalog")]
    EmptyRequest,
}

impl From<ApiError> for MergeError {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct MergeSummary {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub catalog_id: i64,
    pub customer_catalog_id: String,
    pub seller_display_id: String,
}

impl MergeSummary {
    fn all_failed(&self) -> bool {
        self.failed > 0 && self.added == 0 && self.updated == 0 && self.unchanged == 0
    }
}

/// True when any shipping field differs. Missing values compare equal to
/// zero, the empty string and `false` respectively.
pub fn lots_differ(file: &LotData, server: &LotData) -> bool {
    fn num(v: Option<f64>) -> f64 {
        v.unwrap_or(0.)
    }
    let qty = |d: &LotData| num(d.qty.map(|q| q as f64));
    qty(file) != qty(server)
        || num(file.l) != num(server.l)
        || num(file.w) != num(server.w)
        || num(file.h) != num(server.h)
        || num(file.wgt) != num(server.wgt)
        || file.cpack.as_deref().unwrap_or_default() != server.cpack.as_deref().unwrap_or_default()
        || file.force_crate.unwrap_or(false) != server.force_crate.unwrap_or(false)
}

enum Outcome {
    Added,
    Updated,
    Unchanged,
}

struct LotFailure {
    operation: MergeOperation,
    request: AddLotRequest,
    error: ApiError,
    /// The server lot was deleted before the failure.
    deleted: bool,
}

/// Merges the lots of `bulk` into the existing event `catalog_id`.
///
/// Lots are matched on their business item key. New keys are created,
/// keys whose shipping data changed are deleted and recreated with the
/// server's override layer carried over, and identical ones are left alone.
/// Server lots missing from the file are never touched.
///
/// A single lot failing is recorded in `recovery` and the merge goes on.
/// If every lot fails the whole merge is reported as [`MergeError::AllFailed`].
///
/// The update path is not atomic: a failure between the delete and the
/// recreate leaves the lot missing on the server until it is retried from
/// the recovery entry.
pub async fn merge_catalog(
    catalogs: &CatalogService,
    recovery: &RecoveryStore,
    bulk: &BulkInsertRequest,
    catalog_id: i64,
) -> Result<MergeSummary, MergeError> {
    let customer_catalog_id = bulk
        .catalogs
        .first()
        .map(|c| c.customer_catalog_id.clone())
        .ok_or(MergeError::EmptyRequest)?;
    let server_lots = catalogs.fetch_all_lots(&customer_catalog_id).await?;
    let event = catalogs.get_catalog(catalog_id).await?;
    let seller_display_id = event.seller_display_id().unwrap_or_default().to_string();

    let server_map: HashMap<&str, &LotDto> = server_lots
        .iter()
        .filter_map(|lot| lot.customer_item_id.as_deref().map(|id| (id, lot)))
        .collect();

    let mut summary = MergeSummary {
        catalog_id,
        customer_catalog_id: customer_catalog_id.clone(),
        seller_display_id: seller_display_id.clone(),
        ..Default::default()
    };
    let mut server_changed = false;
    for file_lot in bulk.lots().unique_by(|l| l.customer_item_id.clone()) {
        let server_lot = server_map.get(file_lot.customer_item_id.as_str()).copied();
        match merge_lot(catalogs, file_lot, server_lot, catalog_id).await {
            Ok(Outcome::Added) => {
                summary.added += 1;
                server_changed = true;
            }
            Ok(Outcome::Updated) => {
                summary.updated += 1;
                server_changed = true;
            }
            Ok(Outcome::Unchanged) => summary.unchanged += 1,
            Err(LotFailure {
                operation,
                request,
                error,
                deleted,
            }) => {
                let item_id = &file_lot.customer_item_id;
                summary.failed += 1;
                server_changed |= deleted;
                match operation {
                    MergeOperation::Create => {
                        log::warn!("Merge: failed to create lot {item_id}: {error}");
                        summary.errors.push(format!("Failed to add lot {item_id}: {error}"));
                    }
                    MergeOperation::Update => {
                        log::warn!("Merge: failed to update lot {item_id}: {error}");
                        summary
                            .errors
                            .push(format!("Failed to update lot {item_id}: {error}"));
                    }
                }
                recovery
                    .append(RecoveryEntry {
                        customer_item_id: item_id.clone(),
                        lot_number: file_lot.lot_number.clone(),
                        catalog_id,
                        customer_catalog_id: customer_catalog_id.clone(),
                        seller_display_id: seller_display_id.clone(),
                        operation,
                        add_lot_request: request,
                        error_message: error.to_string(),
                        timestamp: OffsetDateTime::now_utc(),
                    })
                    .await;
            }
        }
    }

    if server_changed {
        catalogs.invalidate_catalog(catalog_id).await;
    }
    if summary.all_failed() {
        return Err(MergeError::AllFailed {
            failed: summary.failed,
            first_error: summary
                .errors
                .first()
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
        });
    }
    log::info!(
        "Merged catalog {customer_catalog_id}: {} added, {} updated, {} unchanged, {} failed",
        summary.added,
        summary.updated,
        summary.unchanged,
        summary.failed
    );
    Ok(summary)
}

async fn merge_lot(
    catalogs: &CatalogService,
    file_lot: &BulkInsertLotRequest,
    server_lot: Option<&LotDto>,
    catalog_id: i64,
) -> Result<Outcome, LotFailure> {
    let add_request = |overrides: Vec<LotData>| AddLotRequest {
        customer_item_id: file_lot.customer_item_id.clone(),
        image_links: file_lot.image_links.clone(),
        initial_data: file_lot.initial_data.clone(),
        overriden_data: overrides,
        catalogs: vec![LotCatalog {
            catalog_id,
            lot_number: file_lot.lot_number.clone(),
        }],
    };
    let Some(server_lot) = server_lot else {
        let request = add_request(file_lot.overriden_data.clone());
        return match catalogs.create_lot(&request).await {
            Ok(()) => Ok(Outcome::Added),
            Err(error) => Err(LotFailure {
                operation: MergeOperation::Create,
                request,
                error,
                deleted: false,
            }),
        };
    };
    let server_initial = server_lot.initial_data.clone().unwrap_or_default();
    if !lots_differ(&file_lot.initial_data, &server_initial) {
        return Ok(Outcome::Unchanged);
    }

    let request = add_request(server_lot.overriden_data.clone());
    let (result, deleted) = match catalogs.delete_lot(server_lot.id).await {
        Ok(()) => (catalogs.create_lot(&request).await, true),
        Err(err) => (Err(err), false),
    };
    match result {
        Ok(()) => Ok(Outcome::Updated),
        Err(error) => Err(LotFailure {
            operation: MergeOperation::Update,
            request,
            error,
            deleted,
        }),
    }
}
