use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::firestore::{DocumentStore, Fields};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FavoriteStats {
    pub total_favorites: usize,
    pub active_favorites: usize,
    pub restaurants_with_favorites: usize,
    pub updated: usize,
    pub errors: usize,
    pub zero_initialized: usize,
}

fn count_field(count: usize) -> Fields {
    let mut fields = Fields::new();
    fields.insert("favorite_count".to_string(), json!(count));
    fields
}

/// Rewrites `favorite_count` on every restaurant from the active favorites.
/// A favorite is active unless its `status` is `inactive`. Restaurants with
/// no favorite and no count yet are initialised to 0.
#[instrument(skip(store))]
pub async fn recompute_favorite_counts(
    store: &dyn DocumentStore,
    restaurants: &str,
    favorites: &str,
) -> Result<FavoriteStats> {
    let mut stats = FavoriteStats::default();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for favorite in store.list(favorites).await? {
        stats.total_favorites += 1;
        if favorite.get_str("status") == Some("inactive") {
            continue;
        }
        stats.active_favorites += 1;
        if let Some(restaurant_id) = favorite.get_str("restaurantId").filter(|id| !id.is_empty()) {
            *counts.entry(restaurant_id.to_string()).or_default() += 1;
        }
    }
    stats.restaurants_with_favorites = counts.len();
    info!(
        total = stats.total_favorites,
        active = stats.active_favorites,
        restaurants = stats.restaurants_with_favorites,
        "Favorites counted"
    );

    for (restaurant_id, count) in &counts {
        match store.update(restaurants, restaurant_id, &count_field(*count)).await {
            Ok(()) => stats.updated += 1,
            Err(e) => {
                warn!(restaurant = %restaurant_id, "favorite_count not updated: {}", e);
                stats.errors += 1;
            }
        }
    }

    for restaurant in store.list(restaurants).await? {
        if restaurant.fields.contains_key("favorite_count") || counts.contains_key(&restaurant.id) {
            continue;
        }
        match store.update(restaurants, &restaurant.id, &count_field(0)).await {
            Ok(()) => stats.zero_initialized += 1,
            Err(e) => {
                warn!(restaurant = %restaurant.id, "favorite_count not initialised: {}", e);
                stats.errors += 1;
            }
        }
    }

    info!(updated = stats.updated, zero_initialized = stats.zero_initialized, errors = stats.errors, "Favorite counts updated");
    Ok(stats)
}

impl FavoriteStats {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
