use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of landmarks the face mesh model produces per face.
pub const NUM_LANDMARKS: usize = 468;

/// Fixed face mesh indices used by the readout.
pub mod index {
    pub const NOSE_TIP: usize = 1;
    /// Outer corner of the left eye
    pub const LEFT_EYE_OUTER: usize = 33;
    /// Outer corner of the right eye
    pub const RIGHT_EYE_OUTER: usize = 263;
    pub const CHIN: usize = 152;
    /// Approximately the top of the forehead
    pub const FOREHEAD: usize = 10;
    pub const UPPER_LIP: usize = 13;
    pub const LOWER_LIP: usize = 14;
}

/// A single point on a detected face in normalized image space.
///
/// `x` and `y` are in `0.0..=1.0` relative to the frame, `z` is depth
/// roughly on the same scale as `x`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Component-wise `self - other`
    pub fn delta(&self, other: &Landmark) -> (f32, f32, f32) {
        (self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn distance(&self, other: &Landmark) -> f32 {
        let (dx, dy, dz) = self.delta(other);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Landmarks for every face found in one frame.
///
/// Only the first face is ever consumed, the rest are kept so the
/// detector reply can be logged as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    #[serde(default)]
    pub face_landmarks: Vec<Vec<Landmark>>,
}

impl DetectionResult {
    pub fn new(face_landmarks: Vec<Vec<Landmark>>) -> Self {
        Self { face_landmarks }
    }

    pub fn first_face(&self) -> Option<&[Landmark]> {
        self.face_landmarks
            .first()
            .map(|face| face.as_slice())
            .filter(|face| !face.is_empty())
    }
}

/// Pair of landmark indices joined by a line when drawing the mesh.
pub type Connection = (usize, usize);

const FACE_OVAL: &[usize] = &[
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109, 10,
];
const LIPS_OUTER_LOWER: &[usize] = &[61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291];
const LIPS_OUTER_UPPER: &[usize] = &[61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291];
const LIPS_INNER_LOWER: &[usize] = &[78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308];
const LIPS_INNER_UPPER: &[usize] = &[78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308];
const LEFT_EYE_LOWER: &[usize] = &[33, 7, 163, 144, 145, 153, 154, 155, 133];
const LEFT_EYE_UPPER: &[usize] = &[33, 246, 161, 160, 159, 158, 157, 173, 133];
const RIGHT_EYE_LOWER: &[usize] = &[263, 249, 390, 373, 374, 380, 381, 382, 362];
const RIGHT_EYE_UPPER: &[usize] = &[263, 466, 388, 387, 386, 385, 384, 398, 362];

const CONTOURS: &[&[usize]] = &[
    FACE_OVAL,
    LIPS_OUTER_LOWER,
    LIPS_OUTER_UPPER,
    LIPS_INNER_LOWER,
    LIPS_INNER_UPPER,
    LEFT_EYE_LOWER,
    LEFT_EYE_UPPER,
    RIGHT_EYE_LOWER,
    RIGHT_EYE_UPPER,
];

/// Connectors outlining the face oval, eyes and lips.
pub fn face_contours() -> Vec<Connection> {
    CONTOURS
        .iter()
        .flat_map(|polyline| polyline.windows(2).map(|pair| (pair[0], pair[1])))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const RED: Color = Color::rgb(255, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid color {0:?}, expected #RRGGBB")]
pub struct ParseColorError(String);

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseColorError(s.to_owned()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| ParseColorError(s.to_owned()))
        };
        Ok(Color::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contours_stay_inside_mesh() {
        let contours = face_contours();
        assert!(!contours.is_empty());
        for (a, b) in contours {
            assert!(a < NUM_LANDMARKS && b < NUM_LANDMARKS);
        }
    }

    #[test]
    fn face_oval_is_closed() {
        assert_eq!(FACE_OVAL.first(), FACE_OVAL.last());
        assert!(face_contours().contains(&(109, 10)));
    }

    #[test]
    fn parse_color() {
        assert_eq!("#00FF00".parse::<Color>().unwrap(), Color::GREEN);
        assert_eq!("ff0000".parse::<Color>().unwrap(), Color::RED);
        assert_eq!(Color::GREEN.to_string(), "#00FF00");
        assert!("#00FF0".parse::<Color>().is_err());
        assert!("#GG0000".parse::<Color>().is_err());
        assert!("#+1+2+3".parse::<Color>().is_err());
    }

    #[test]
    fn first_face_skips_empty_results() {
        assert!(DetectionResult::default().first_face().is_none());
        assert!(DetectionResult::new(vec![vec![]]).first_face().is_none());
        let result = DetectionResult::new(vec![vec![Landmark::new(0.5, 0.5, 0.0)]]);
        assert_eq!(result.first_face().map(|face| face.len()), Some(1));
    }

    #[test]
    fn landmark_reply_without_depth() {
        let result: DetectionResult =
            serde_json::from_str(r#"{"faceLandmarks":[[{"x":0.25,"y":0.75}]]}"#).unwrap();
        assert_eq!(result.face_landmarks[0][0], Landmark::new(0.25, 0.75, 0.0));
    }
}
