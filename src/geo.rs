//! Geographic helpers for the `locations` filter.
//!
//! The streaming endpoint only understands rectangular bounding boxes. This
//! module converts "radius around a point" circles into boxes using a flat
//! projection: the latitude half-extent is the arc angle `radius / R`, and the
//! longitude half-extent is additionally divided by `cos(latitude)` because
//! degrees of longitude shrink toward the poles.
//!
//! This is an approximation, not a great-circle computation. It is accurate
//! enough for city-scale circles away from the poles and the antimeridian,
//! which is all a keyword/location filter needs.

use serde::{Deserialize, Serialize};

use crate::error::MalformedFilterInput;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Smallest half-extent of a circle's box, one step of the 2-decimal grid.
pub const MIN_EXTENT_DEGREES: f64 = 0.01;

// Values already on the 2-decimal grid must not move a step when snapped
const GRID_EPSILON: f64 = 1e-9;

/// Rectangle `(min_lon, min_lat, max_lon, max_lat)` in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub const fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Builds a box from a raw `[min_lon, min_lat, max_lon, max_lat]` slice.
    ///
    /// # Errors
    ///
    /// - `MalformedFilterInput::BoxArity` if the slice does not have exactly 4 values
    /// - `MalformedFilterInput::NonFiniteCoordinate` if any value is NaN or infinite
    pub fn from_slice(values: &[f64]) -> Result<Self, MalformedFilterInput> {
        match values {
            [min_lon, min_lat, max_lon, max_lat] => {
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(MalformedFilterInput::NonFiniteCoordinate {
                        values: values.to_vec(),
                    });
                }
                Ok(Self::new(*min_lon, *min_lat, *max_lon, *max_lat))
            }
            _ => Err(MalformedFilterInput::BoxArity {
                len: values.len(),
                values: values.to_vec(),
            }),
        }
    }

    pub const fn to_array(self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    /// The box snapped outward to the 2-decimal grid used on the wire.
    ///
    /// Minimums round down and maximums round up, so the snapped box always
    /// contains the original one.
    pub fn rounded_outward(&self) -> Self {
        Self::new(
            floor2(self.min_lon),
            floor2(self.min_lat),
            ceil2(self.max_lon),
            ceil2(self.max_lat),
        )
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.min_lon <= lon && lon <= self.max_lon && self.min_lat <= lat && lat <= self.max_lat
    }

    /// Lexicographic ordering on the raw tuple.
    pub fn lexicographic_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_array()
            .iter()
            .zip(other.to_array().iter())
            .map(|(a, b)| a.total_cmp(b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

/// A circle given as center longitude/latitude (degrees) and radius (km).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub lon: f64,
    pub lat: f64,
    pub radius_km: f64,
}

impl Circle {
    /// Builds a circle from a raw `[lon, lat, radius_km]` triplet.
    ///
    /// # Errors
    ///
    /// - `MalformedFilterInput::CircleArity` if the slice does not have exactly 3 values
    /// - `MalformedFilterInput::NonFiniteCoordinate` if any value is NaN or infinite
    /// - `MalformedFilterInput::InvalidCircle` if the radius is not positive or the
    ///   latitude is not strictly between -90 and 90
    pub fn from_slice(values: &[f64]) -> Result<Self, MalformedFilterInput> {
        let [lon, lat, radius_km] = values else {
            return Err(MalformedFilterInput::CircleArity {
                len: values.len(),
                values: values.to_vec(),
            });
        };

        if values.iter().any(|v| !v.is_finite()) {
            return Err(MalformedFilterInput::NonFiniteCoordinate {
                values: values.to_vec(),
            });
        }
        if *radius_km <= 0.0 {
            return Err(MalformedFilterInput::InvalidCircle {
                values: values.to_vec(),
                reason: "radius must be greater than zero".to_string(),
            });
        }
        if lat.abs() >= 90.0 {
            return Err(MalformedFilterInput::InvalidCircle {
                values: values.to_vec(),
                reason: "latitude must be strictly between -90 and 90".to_string(),
            });
        }

        Ok(Self {
            lon: *lon,
            lat: *lat,
            radius_km: *radius_km,
        })
    }
}

/// Rounds to 2 decimal places (half away from zero).
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// `+ 0.0` turns -0.0 into 0.0 so it never prints as "-0.00"
fn floor2(value: f64) -> f64 {
    (value * 100.0 + GRID_EPSILON).floor() / 100.0 + 0.0
}

fn ceil2(value: f64) -> f64 {
    (value * 100.0 - GRID_EPSILON).ceil() / 100.0 + 0.0
}

/// Converts a circle into the bounding box that encloses it.
///
/// Both half-extents are rounded to 2 decimal places, and never below
/// [`MIN_EXTENT_DEGREES`], before being applied to the center. Small circles
/// therefore still get a box with a non-zero area around the center point.
///
/// # Example
///
/// ```rust
/// use firehose::geo::{bounding_box_for_circle, Circle};
///
/// // 111.19 km is roughly one degree of arc on the equator.
/// let circle = Circle { lon: 0.0, lat: 0.0, radius_km: 111.19 };
/// let bbox = bounding_box_for_circle(&circle);
/// assert_eq!(bbox.to_array(), [-1.0, -1.0, 1.0, 1.0]);
/// ```
pub fn bounding_box_for_circle(circle: &Circle) -> BoundingBox {
    let arc = circle.radius_km / EARTH_RADIUS_KM;
    let lat_extent = round2(arc.to_degrees()).max(MIN_EXTENT_DEGREES);
    let lon_extent =
        round2((arc / circle.lat.to_radians().cos()).to_degrees()).max(MIN_EXTENT_DEGREES);

    BoundingBox::new(
        circle.lon - lon_extent,
        circle.lat - lat_extent,
        circle.lon + lon_extent,
        circle.lat + lat_extent,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_degree_circle_on_equator() {
        let circle = Circle::from_slice(&[0.0, 0.0, 111.19]).unwrap();
        let bbox = bounding_box_for_circle(&circle);
        assert_eq!(bbox, BoundingBox::new(-1.0, -1.0, 1.0, 1.0));
    }

    #[test]
    fn test_longitude_extent_grows_with_latitude() {
        let equator = bounding_box_for_circle(&Circle {
            lon: 10.0,
            lat: 0.0,
            radius_km: 50.0,
        });
        let north = bounding_box_for_circle(&Circle {
            lon: 10.0,
            lat: 60.0,
            radius_km: 50.0,
        });

        let equator_width = equator.max_lon - equator.min_lon;
        let north_width = north.max_lon - north.min_lon;
        // cos(60°) = 0.5, so the box is about twice as wide
        assert!(north_width > equator_width * 1.9);
        assert!((north.max_lat - north.min_lat - (equator.max_lat - equator.min_lat)).abs() < 1e-9);
    }

    #[test]
    fn test_box_contains_center() {
        let centers = [
            (12.5683, 55.6761, 5.0),
            (-122.4194, 37.7749, 25.0),
            (151.2093, -33.8688, 0.1),
            (0.0, 89.5, 10.0),
            (-179.9, -89.9, 1000.0),
        ];
        for (lon, lat, radius_km) in centers {
            let bbox = bounding_box_for_circle(&Circle { lon, lat, radius_km });
            assert!(
                bbox.contains(lon, lat),
                "{:?} does not contain ({}, {})",
                bbox,
                lon,
                lat
            );
        }
    }

    #[test]
    fn test_circle_validation() {
        assert!(matches!(
            Circle::from_slice(&[1.0, 2.0]),
            Err(MalformedFilterInput::CircleArity { len: 2, .. })
        ));
        assert!(matches!(
            Circle::from_slice(&[1.0, 2.0, 3.0, 4.0]),
            Err(MalformedFilterInput::CircleArity { len: 4, .. })
        ));
        assert!(matches!(
            Circle::from_slice(&[1.0, 90.0, 3.0]),
            Err(MalformedFilterInput::InvalidCircle { .. })
        ));
        assert!(matches!(
            Circle::from_slice(&[1.0, 2.0, 0.0]),
            Err(MalformedFilterInput::InvalidCircle { .. })
        ));
        assert!(matches!(
            Circle::from_slice(&[f64::NAN, 2.0, 3.0]),
            Err(MalformedFilterInput::NonFiniteCoordinate { .. })
        ));
    }

    #[test]
    fn test_box_from_slice_and_ordering() {
        assert!(matches!(
            BoundingBox::from_slice(&[1.0, 2.0, 3.0]),
            Err(MalformedFilterInput::BoxArity { len: 3, .. })
        ));

        let a = BoundingBox::from_slice(&[-1.0, 5.0, 2.0, 6.0]).unwrap();
        let b = BoundingBox::from_slice(&[-1.0, 4.0, 9.0, 9.0]).unwrap();
        assert_eq!(a.lexicographic_cmp(&b), std::cmp::Ordering::Greater);
        assert_eq!(a.lexicographic_cmp(&a), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_small_circle_keeps_minimum_extent() {
        let circle = Circle::from_slice(&[0.006, 0.006, 0.1]).unwrap();
        let bbox = bounding_box_for_circle(&circle);

        assert!((bbox.max_lon - bbox.min_lon - 2.0 * MIN_EXTENT_DEGREES).abs() < 1e-9);
        assert!((bbox.max_lat - bbox.min_lat - 2.0 * MIN_EXTENT_DEGREES).abs() < 1e-9);
        assert!(bbox.contains(0.006, 0.006));

        let snapped = bbox.rounded_outward();
        assert_eq!(snapped.to_array(), [-0.01, -0.01, 0.02, 0.02]);
        assert!(snapped.contains(0.006, 0.006));
    }

    #[test]
    fn test_rounded_outward_keeps_grid_values() {
        let bbox = BoundingBox::new(-122.75, 36.8, -121.75, 37.8);
        assert_eq!(bbox.rounded_outward(), bbox);

        let bbox = BoundingBox::new(0.001, -0.004, 0.004, 0.0);
        let snapped = bbox.rounded_outward();
        assert_eq!(snapped.to_array(), [0.0, -0.01, 0.01, 0.0]);
        assert!(snapped.max_lat.is_sign_positive());
    }
}
