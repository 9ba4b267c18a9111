pub mod converter;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod format;
pub mod model;
pub mod options;
pub mod route;
pub mod schema;
pub mod source;

use wasm_bindgen::prelude::*;

pub use crate::decoder::{decode, decode_file};
pub use crate::encoder::{assemble_activity, encode_to_file, encode_to_vec, write_activity};
pub use crate::error::{DecodeError, EncodeError, SchemaViolation};
pub use crate::model::{Activity, Lap, Position, SensorState, Sport, Track, TrackPoint};
pub use crate::options::ConvertOptions;
pub use crate::route::{ActivityRoute, routes_from};
pub use crate::source::{
    ActivityExport, ActivitySummary, InMemoryTrackPoints, LapSummary, RawTrackPoint, TrackPointSource,
};

/// Decode a TCX document, returned as an array of activities.
#[wasm_bindgen(js_name = tcxToActivities)]
pub fn tcx_to_activities(bytes: &[u8]) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let activities = decode(bytes)?;
    serde_wasm_bindgen::to_value(&activities).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Convert a TCX document to GeoJSON, returned as a JS object.
#[wasm_bindgen(js_name = tcxToGeoJson)]
pub fn tcx_to_geojson(bytes: &[u8], options: JsValue) -> Result<JsValue, JsValue> {
    console_error_panic_hook::set_once();

    let opts = parse_options(options)?;
    let routes = routes_from(decode(bytes)?);
    let fc = converter::to_feature_collection(&routes, &opts);
    serde_wasm_bindgen::to_value(&fc).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Convert a TCX document to GeoJSON, returned as a JSON string.
#[wasm_bindgen(js_name = tcxToGeoJsonString)]
pub fn tcx_to_geojson_string(bytes: &[u8], options: JsValue) -> Result<String, JsValue> {
    console_error_panic_hook::set_once();

    let opts = parse_options(options)?;
    let routes = routes_from(decode(bytes)?);
    let fc = converter::to_feature_collection(&routes, &opts);
    serde_json::to_string(&fc).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Encode an activity export to a TCX document.
/// Returns `undefined` when no lap has track points.
#[wasm_bindgen(js_name = activityToTcx)]
pub fn activity_to_tcx(export: JsValue) -> Result<Option<js_sys::Uint8Array>, JsValue> {
    console_error_panic_hook::set_once();

    let export: ActivityExport =
        serde_wasm_bindgen::from_value(export).map_err(|e| JsValue::from_str(&e.to_string()))?;
    let source = InMemoryTrackPoints::new(export.track_points);
    let bytes = encode_to_vec(&export.activity, &export.laps, &source)?;
    Ok(bytes.map(|b| js_sys::Uint8Array::from(b.as_slice())))
}

fn parse_options(options: JsValue) -> Result<ConvertOptions, JsValue> {
    if options.is_undefined() || options.is_null() {
        Ok(ConvertOptions::default())
    } else {
        serde_wasm_bindgen::from_value(options).map_err(|e| JsValue::from_str(&e.to_string()))
    }
}
