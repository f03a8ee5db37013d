//! Validation and bounding of inbound location fixes and route uploads.

use rally_common::blob;
use rally_common::types::caps;
use rally_common::wire::{GeoPoint, LocationFix, Route, RouteItem};
use serde_json::Value;

/// Loose numeric coercion: numbers pass through, numeric strings parse.
/// Anything non-finite is rejected.
pub fn as_finite_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn capped(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Validate an inbound location payload.
///
/// `lat`/`lng` must coerce to finite numbers; `accuracy` is kept only when
/// it is already numeric; a missing or non-numeric `timestamp` falls back
/// to the server clock.
#[must_use]
pub fn location(payload: &Value, now_ms: u64) -> Option<LocationFix> {
    let lat = as_finite_f64(payload.get("lat")?)?;
    let lng = as_finite_f64(payload.get("lng")?)?;
    let accuracy = payload
        .get("accuracy")
        .and_then(Value::as_number)
        .and_then(serde_json::Number::as_f64)
        .filter(|v| v.is_finite());
    let timestamp = payload
        .get("timestamp")
        .and_then(as_finite_f64)
        .filter(|v| *v >= 0.0)
        .map_or(now_ms, |v| v as u64);

    Some(LocationFix {
        lat,
        lng,
        accuracy,
        timestamp,
    })
}

/// Sanitize a routes upload. Returns `None` for non-list input; otherwise
/// a bounded list of routes, each with at least one valid item.
#[must_use]
pub fn routes(payload: &Value, max_routes: usize, max_points: usize) -> Option<Vec<Route>> {
    let list = payload.as_array()?;
    Some(
        list.iter()
            .take(max_routes)
            .filter_map(|raw| route(raw, max_points))
            .collect(),
    )
}

fn route(raw: &Value, max_points: usize) -> Option<Route> {
    let obj = raw.as_object()?;
    let id = capped(obj.get("id")?.as_str()?, caps::ROUTE_ID);
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(|s| capped(s, caps::ROUTE_NAME));
    let color = obj
        .get("color")
        .and_then(Value::as_str)
        .map(|s| capped(s, caps::ROUTE_COLOR));
    let items: Vec<RouteItem> = obj
        .get("items")?
        .as_array()?
        .iter()
        .take(max_points)
        .filter_map(route_item)
        .collect();
    if items.is_empty() {
        return None;
    }
    Some(Route {
        id,
        name,
        color,
        items,
    })
}

fn route_item(raw: &Value) -> Option<RouteItem> {
    let obj = raw.as_object()?;
    let id = capped(obj.get("id")?.as_str()?, caps::ITEM_ID);
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(|s| capped(s, caps::ITEM_NAME));
    let position = obj.get("position")?;
    let lat = as_finite_f64(position.get("lat")?)?;
    let lng = as_finite_f64(position.get("lng")?)?;
    Some(RouteItem {
        id,
        name,
        position: GeoPoint { lat, lng },
    })
}

/// Content hash of a sanitized routes list: SHA-1 over its canonical JSON,
/// base64-encoded. Identical uploads hash identically.
#[must_use]
pub fn routes_hash(routes: &[Route]) -> String {
    let canonical = serde_json::to_vec(routes).unwrap_or_default();
    blob::content_hash(&canonical)
}

/// Trim and cap an optional client display name; empty becomes `None`.
#[must_use]
pub fn display_name(payload: &Value) -> Option<String> {
    let trimmed = payload.get("name")?.as_str()?.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(capped(trimmed, caps::PEER_LABEL))
}
