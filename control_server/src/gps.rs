//! GPS fixes extracted from phone sensor frames.
//!
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const TIMESTAMP: &str = "locationTimestamp_since1970";
const LONGITUDE: &str = "locationLongitude";
const LATITUDE: &str = "locationLatitude";
const HORIZONTAL_ACCURACY: &str = "locationHorizontalAccuracy";
const TRUE_HEADING: &str = "locationTrueHeading";
const HEADING_ACCURACY: &str = "locationHeadingAccuracy";

/// Position and heading of the phone. Angles are in radians.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpsFix {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub longitude: f64,
    pub latitude: f64,
    /// Horizontal accuracy in meters.
    pub gps_accuracy: f64,
    pub heading: f64,
    pub heading_accuracy: f64,
}

impl GpsFix {
    /// Build a fix from a sensor frame.
    ///
    /// Sensor apps send numbers either as JSON numbers or as strings. Frames
    /// missing any location field, or holding a non-numeric one, carry no fix.
    pub fn from_sensor_frame(frame: &Map<String, Value>) -> Option<Self> {
        let field = |key: &str| frame.get(key).and_then(as_f64);

        Some(Self {
            timestamp: field(TIMESTAMP)?,
            longitude: field(LONGITUDE)?,
            latitude: field(LATITUDE)?,
            gps_accuracy: field(HORIZONTAL_ACCURACY)?,
            heading: field(TRUE_HEADING)?.to_radians(),
            heading_accuracy: field(HEADING_ACCURACY)?.to_radians(),
        })
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod test {

    use serde_json::json;

    use super::*;

    fn frame(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn full_frame() -> Value {
        json!({
            "locationTimestamp_since1970": "1700000000.5",
            "locationLongitude": 8.5417,
            "locationLatitude": "47.3769",
            "locationHorizontalAccuracy": 4,
            "locationTrueHeading": "180",
            "locationHeadingAccuracy": 90.0,
            "accelerometerAccelerationX": "0.01"
        })
    }

    #[test]
    fn test_fix_from_full_frame() {
        let fix = GpsFix::from_sensor_frame(&frame(full_frame())).unwrap();

        assert_eq!(fix.timestamp, 1_700_000_000.5);
        assert_eq!(fix.longitude, 8.5417);
        assert_eq!(fix.latitude, 47.3769);
        assert_eq!(fix.gps_accuracy, 4.0);
        assert!((fix.heading - std::f64::consts::PI).abs() < 1e-12);
        assert!((fix.heading_accuracy - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_missing_field_has_no_fix() {
        let mut data = frame(full_frame());
        data.remove(HEADING_ACCURACY);
        assert!(GpsFix::from_sensor_frame(&data).is_none());
    }

    #[test]
    fn test_non_numeric_field_has_no_fix() {
        let mut data = frame(full_frame());
        data.insert(LATITUDE.into(), json!("north"));
        assert!(GpsFix::from_sensor_frame(&data).is_none());
    }

    #[test]
    fn test_wire_names() {
        let fix = GpsFix::from_sensor_frame(&frame(full_frame())).unwrap();
        let value = serde_json::to_value(fix).unwrap();
        for key in [
            "timestamp",
            "longitude",
            "latitude",
            "gpsAccuracy",
            "heading",
            "headingAccuracy",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
