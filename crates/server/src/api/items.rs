//! Item API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use mediarelay_core::{
    item::{ItemMetadata, VariantKey},
    CreateItemRequest, Item, ItemError, ItemFilter, Stage,
};

use crate::state::AppState;

/// Maximum allowed limit for item queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for item queries
const DEFAULT_LIMIT: i64 = 100;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating an item
#[derive(Debug, Deserialize)]
pub struct CreateItemBody {
    /// Source link per variant key
    pub source_links: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: ItemMetadata,
}

/// Query parameters for listing items
#[derive(Debug, Deserialize)]
pub struct ListItemsParams {
    /// Filter by stage
    pub stage: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Item with its published references pulled out
#[derive(Debug, Serialize)]
pub struct ItemResponse {
    #[serde(flatten)]
    pub item: Item,
    pub references: BTreeMap<VariantKey, String>,
}

impl From<Item> for ItemResponse {
    fn from(item: Item) -> Self {
        Self {
            references: item.references(),
            item,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListItemsResponse {
    pub items: Vec<ItemResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Status code plus JSON error body
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

pub fn store_error(e: ItemError) -> ApiError {
    let status = match e {
        ItemError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ItemError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e)
}

// ============================================================================
// Handlers
// ============================================================================

/// Create a new pending item
pub async fn create_item(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateItemBody>,
) -> Result<(StatusCode, Json<ItemResponse>), ApiError> {
    let request = CreateItemRequest {
        source_links: body
            .source_links
            .into_iter()
            .map(|(variant, url)| (VariantKey::new(variant.trim()), url.trim().to_string()))
            .collect(),
        metadata: body.metadata,
    };

    match state.store().create(request) {
        Ok(item) => {
            info!(
                "Created item {} with {} variant(s)",
                item.id,
                item.source_links.len()
            );
            Ok((StatusCode::CREATED, Json(ItemResponse::from(item))))
        }
        Err(e) => Err(store_error(e)),
    }
}

/// Get an item by ID
pub async fn get_item(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, ApiError> {
    match state.store().get(&id) {
        Ok(Some(item)) => Ok(Json(ItemResponse::from(item))),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            format!("Item not found: {}", id),
        )),
        Err(e) => Err(store_error(e)),
    }
}

/// List items, oldest first, optionally in one stage
pub async fn list_items(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListItemsParams>,
) -> Result<Json<ListItemsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let stage = match params.stage.as_deref().map(str::parse::<Stage>).transpose() {
        Ok(stage) => stage,
        Err(e) => return Err(error_response(StatusCode::BAD_REQUEST, e)),
    };

    let mut filter = ItemFilter::new().with_limit(limit).with_offset(offset);
    if let Some(stage) = stage {
        filter = filter.with_stage(stage);
    }

    let items = state.store().list(&filter).map_err(store_error)?;
    let counts = state.store().count_by_stage().map_err(store_error)?;
    let total = match stage {
        Some(stage) => counts.get(&stage).copied().unwrap_or(0),
        None => counts.values().sum(),
    };

    Ok(Json(ListItemsResponse {
        items: items.into_iter().map(ItemResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}
