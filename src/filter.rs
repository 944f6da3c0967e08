//! Filter specification for the streaming endpoint.
//!
//! A [`FilterSpec`] holds the keywords to track, the bounding boxes to watch and
//! any extra endpoint parameters, and serializes them into the form body of the
//! stream request. Validation failures are logged and returned to the caller,
//! and always leave the previously stored state untouched.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::MalformedFilterInput;
use crate::geo::{bounding_box_for_circle, BoundingBox, Circle};

/// Parameter name for keyword tracking.
pub const TRACK_PARAM: &str = "track";
/// Parameter name for the flattened bounding boxes.
pub const LOCATIONS_PARAM: &str = "locations";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    track: Vec<String>,
    boxes: Vec<BoundingBox>,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tracked keywords. Keywords are taken as already sanitized.
    pub fn set_track<I, S>(&mut self, keywords: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.track = keywords.into_iter().map(Into::into).collect();
        debug!("Tracking {} keywords", self.track.len());
    }

    /// Replaces the bounding boxes.
    ///
    /// Each box must have exactly four components
    /// `[min_lon, min_lat, max_lon, max_lat]`. Boxes are sorted before being stored
    /// so the serialized parameter is deterministic.
    ///
    /// # Errors
    ///
    /// Returns the first malformed box. Nothing is replaced unless the whole
    /// batch is valid.
    pub fn set_locations<B: AsRef<[f64]>>(&mut self, boxes: &[B]) -> Result<(), MalformedFilterInput> {
        let mut parsed = Vec::with_capacity(boxes.len());
        for raw in boxes {
            match BoundingBox::from_slice(raw.as_ref()) {
                Ok(bbox) => parsed.push(bbox),
                Err(e) => {
                    warn!("Rejecting location boxes: {}", e);
                    return Err(e);
                }
            }
        }
        self.replace_boxes(parsed);
        Ok(())
    }

    /// Replaces the bounding boxes with boxes enclosing `[lon, lat, radius_km]` circles.
    ///
    /// # Errors
    ///
    /// Returns the first malformed triplet. Nothing is replaced unless the whole
    /// batch is valid.
    pub fn set_locations_by_circle<C: AsRef<[f64]>>(
        &mut self,
        circles: &[C],
    ) -> Result<(), MalformedFilterInput> {
        let mut parsed = Vec::with_capacity(circles.len());
        for raw in circles {
            let circle = match Circle::from_slice(raw.as_ref()) {
                Ok(circle) => circle,
                Err(e) => {
                    warn!("Rejecting location circles: {}", e);
                    return Err(e);
                }
            };
            let bbox = bounding_box_for_circle(&circle);
            debug!(
                "Resolved location circle [{}, {}, r: {}] -> bbox: [{}, {}, {}, {}]",
                circle.lon,
                circle.lat,
                circle.radius_km,
                bbox.min_lon,
                bbox.min_lat,
                bbox.max_lon,
                bbox.max_lat
            );
            parsed.push(bbox);
        }
        self.replace_boxes(parsed);
        Ok(())
    }

    /// Sets an extra endpoint parameter such as `follow` or `stall_warnings`.
    ///
    /// `track` and `locations` are always taken from the typed fields and
    /// override an extra parameter of the same name.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parameters.insert(key.into(), value.into());
    }

    pub fn track(&self) -> &[String] {
        &self.track
    }

    pub fn boxes(&self) -> &[BoundingBox] {
        &self.boxes
    }

    /// The stored boxes flattened into one ordered sequence of floats.
    pub fn locations(&self) -> Vec<f64> {
        self.boxes.iter().flat_map(|b| b.to_array()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.track.is_empty() && self.boxes.is_empty() && self.parameters.is_empty()
    }

    /// Builds the form parameters for the stream request.
    ///
    /// `track` is the comma-joined keyword list and `locations` the comma-joined
    /// box coordinates formatted to two decimals. Boxes are snapped outward to
    /// that grid first, so the wire box never excludes a point the stored box
    /// covers. Either key is omitted when empty.
    pub fn to_request_parameters(&self) -> BTreeMap<String, String> {
        let mut params = self.parameters.clone();

        params.remove(TRACK_PARAM);
        if !self.track.is_empty() {
            params.insert(TRACK_PARAM.to_string(), self.track.join(","));
        }

        params.remove(LOCATIONS_PARAM);
        if !self.boxes.is_empty() {
            let locations = self
                .boxes
                .iter()
                .flat_map(|b| b.rounded_outward().to_array())
                .map(|v| format!("{:.2}", v))
                .collect::<Vec<_>>()
                .join(",");
            params.insert(LOCATIONS_PARAM.to_string(), locations);
        }

        params
    }

    fn replace_boxes(&mut self, mut boxes: Vec<BoundingBox>) {
        boxes.sort_by(BoundingBox::lexicographic_cmp);
        debug!("Tracking {} location boxes", boxes.len());
        self.boxes = boxes;
    }
}
