//! Pull raw readings from the upstream sensor API.
//!
//! The API pages with an opaque cursor: each response carries a `results`
//! array and a `next_cursor` that is absent on the last page. Items that do not
//! deserialize into a [`RawReading`] are skipped; casting and validation happen
//! later in the bronze stage where rejects are reported per row.

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::RawReading;

// ---

/// Fetch every page from `base_url`, stopping after `max_pages`.
pub async fn fetch_raw_readings(base_url: &str, max_pages: u32) -> Result<Vec<RawReading>> {
    // ---
    let client = reqwest::Client::new();
    let mut all_data = Vec::new();
    let mut cursor: Option<String> = None;
    let mut page_count = 0;

    loop {
        if page_count >= max_pages {
            warn!(
                "Hit page limit of {}, stopping pagination. Fetched {} records so far.",
                max_pages,
                all_data.len()
            );
            break;
        }
        page_count += 1;

        let mut request = client.get(base_url);
        if let Some(ref cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        debug!("Fetching page {} (cursor {:?})", page_count, cursor);

        let response: Value = request
            .send()
            .await
            .with_context(|| format!("Failed to fetch page {page_count} from {base_url}"))?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("Page {page_count} is not valid JSON"))?;

        let (items, next) = parse_page(&response);
        debug!("Page {} parsed {} readings", page_count, items.len());
        all_data.extend(items);

        cursor = next;
        if cursor.is_none() {
            break;
        }
    }

    info!(
        "Finished fetching {} total records from {} pages",
        all_data.len(),
        page_count
    );
    Ok(all_data)
}

/// Split one API page into its readings and the cursor of the next page.
fn parse_page(page: &Value) -> (Vec<RawReading>, Option<String>) {
    // ---
    let mut readings = Vec::new();

    match page.get("results").and_then(Value::as_array) {
        Some(items) => {
            for (i, item) in items.iter().enumerate() {
                match serde_json::from_value::<RawReading>(item.clone()) {
                    Ok(reading) => readings.push(reading),
                    Err(e) => debug!("Skipping item {}: {} - raw item: {}", i, e, item),
                }
            }
        }
        None => warn!("Page response missing 'results' array"),
    }

    let next = page
        .get("next_cursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(String::from);

    (readings, next)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_page_with_cursor() {
        // ---
        let page = json!({
            "results": [
                {"reading_id": "R001", "device_id": "DEV001", "metric_name": "temperature",
                 "metric_value": "72.5", "reading_ts": "2024-01-01T08:00:00Z"},
                "not an object"
            ],
            "next_cursor": "abc"
        });
        let (items, next) = parse_page(&page);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].reading_id, Some(json!("R001")));
        assert_eq!(next.as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_last_page() {
        // ---
        let (items, next) = parse_page(&json!({"results": [], "next_cursor": null}));
        assert!(items.is_empty());
        assert_eq!(next, None);

        let (items, next) = parse_page(&json!({"error": "boom"}));
        assert!(items.is_empty());
        assert_eq!(next, None);
    }
}
