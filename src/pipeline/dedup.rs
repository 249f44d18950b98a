//! Collapse multiple versions of a reading to the latest-ingested one.

use std::collections::HashMap;

use crate::models::Reading;

// ---

/// Keep one reading per `reading_id`: the version with the greatest
/// `ingested_at`. On equal `ingested_at` the earlier input row wins.
/// Output keeps the order in which each `reading_id` first appeared.
pub fn dedup_latest(readings: Vec<Reading>) -> Vec<Reading> {
    // ---
    let mut slot_by_id: HashMap<String, usize> = HashMap::with_capacity(readings.len());
    let mut kept: Vec<Reading> = Vec::with_capacity(readings.len());

    for reading in readings {
        match slot_by_id.get(&reading.reading_id) {
            Some(&slot) => {
                if reading.ingested_at > kept[slot].ingested_at {
                    kept[slot] = reading;
                }
            }
            None => {
                slot_by_id.insert(reading.reading_id.clone(), kept.len());
                kept.push(reading);
            }
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::MetricName;
    use chrono::{TimeZone, Utc};

    fn create_reading(id: &str, value: f64, ingested_minute: u32) -> Reading {
        // ---
        Reading {
            reading_id: id.to_string(),
            device_id: "DEV001".to_string(),
            metric_name: MetricName::Temperature,
            metric_value: Some(value),
            reading_ts: Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
            ingested_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, ingested_minute, 0).unwrap(),
            is_missing_value: false,
        }
    }

    #[test]
    fn test_keeps_latest_ingested_version() {
        // ---
        let out = dedup_latest(vec![
            create_reading("R013", 20.0, 1),
            create_reading("R014", 30.0, 1),
            create_reading("R013", 21.0, 5),
            create_reading("R013", 19.0, 3),
        ]);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].reading_id, "R013");
        assert_eq!(out[0].metric_value, Some(21.0));
        assert_eq!(out[1].reading_id, "R014");
    }

    #[test]
    fn test_tie_keeps_first_input_row() {
        // ---
        let out = dedup_latest(vec![
            create_reading("R001", 1.0, 2),
            create_reading("R001", 2.0, 2),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].metric_value, Some(1.0));
    }

    #[test]
    fn test_single_version_unchanged() {
        // ---
        let reading = create_reading("R001", 1.0, 0);
        assert_eq!(dedup_latest(vec![reading.clone()]), vec![reading]);
    }

    #[test]
    fn test_empty_input() {
        // ---
        assert!(dedup_latest(Vec::new()).is_empty());
    }
}
