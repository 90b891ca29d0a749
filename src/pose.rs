use crate::landmark::{index, Landmark};
use clap::ValueEnum;

/// Offset that turns a forward facing head into roughly 0° yaw and pitch.
const RECENTER_OFFSET_DEGREES: f32 = 90.0;

/// Mouth distance is reported in hundredths of normalized image space.
const MOUTH_SCALE: f32 = 100.0;

/// Which flavour of yaw and pitch gets reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum AngleMode {
    /// Plain `atan2` output, forward facing reads around 90°
    #[default]
    Raw,
    /// Yaw and pitch shifted by -90° so forward facing reads around 0°
    Recentered,
}

/// Approximate head rotation in degrees, always stored raw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    /// Lip distance, only present when requested
    pub mouth_open: Option<f32>,
}

/// The landmarks a [`HeadPose`] is computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseLandmarks {
    pub nose_tip: Landmark,
    pub left_eye: Landmark,
    pub right_eye: Landmark,
    pub chin: Landmark,
    pub forehead: Landmark,
    pub upper_lip: Landmark,
    pub lower_lip: Landmark,
}

impl PoseLandmarks {
    /// Picks the fixed indices out of a face. `None` if the face is truncated.
    pub fn from_face(face: &[Landmark]) -> Option<Self> {
        let at = |i: usize| face.get(i).copied();
        Some(Self {
            nose_tip: at(index::NOSE_TIP)?,
            left_eye: at(index::LEFT_EYE_OUTER)?,
            right_eye: at(index::RIGHT_EYE_OUTER)?,
            chin: at(index::CHIN)?,
            forehead: at(index::FOREHEAD)?,
            upper_lip: at(index::UPPER_LIP)?,
            lower_lip: at(index::LOWER_LIP)?,
        })
    }
}

/// Yaw and roll from the eye vector (right eye minus left eye).
pub fn eye_angles(right_eye: &Landmark, left_eye: &Landmark) -> (f32, f32) {
    let (dx, dy, dz) = right_eye.delta(left_eye);
    let yaw = dx.atan2(dz).to_degrees();
    let roll = dy.atan2(dx).to_degrees();
    (yaw, roll)
}

/// Pitch from the chin minus forehead vector.
pub fn pitch(chin: &Landmark, forehead: &Landmark) -> f32 {
    let (_, dy, dz) = chin.delta(forehead);
    dy.atan2(dz).to_degrees()
}

/// Scaled distance between the lips. Symmetric in its arguments.
pub fn mouth_openness(upper_lip: &Landmark, lower_lip: &Landmark) -> f32 {
    upper_lip.distance(lower_lip) * MOUTH_SCALE
}

impl HeadPose {
    pub fn from_landmarks(landmarks: &PoseLandmarks, with_mouth: bool) -> Self {
        let (yaw, roll) = eye_angles(&landmarks.right_eye, &landmarks.left_eye);
        let pitch = pitch(&landmarks.chin, &landmarks.forehead);
        let mouth_open =
            with_mouth.then(|| mouth_openness(&landmarks.upper_lip, &landmarks.lower_lip));
        Self {
            yaw,
            pitch,
            roll,
            mouth_open,
        }
    }

    pub fn from_face(face: &[Landmark], with_mouth: bool) -> Option<Self> {
        PoseLandmarks::from_face(face).map(|landmarks| Self::from_landmarks(&landmarks, with_mouth))
    }

    /// Angles as they should be shown for `mode`
    pub fn in_mode(&self, mode: AngleMode) -> Self {
        match mode {
            AngleMode::Raw => *self,
            AngleMode::Recentered => Self {
                yaw: self.yaw - RECENTER_OFFSET_DEGREES,
                pitch: self.pitch - RECENTER_OFFSET_DEGREES,
                ..*self
            },
        }
    }

    /// Multi line readout text, one value per line.
    pub fn readout(&self, mode: AngleMode) -> String {
        let pose = self.in_mode(mode);
        let mut text = format!(
            "Yaw: {:.2}°\nPitch: {:.2}°\nRoll: {:.2}°",
            pose.yaw, pose.pitch, pose.roll
        );
        if let Some(mouth_open) = pose.mouth_open {
            text.push_str(&format!("\nMouth: {:.2}", mouth_open));
        }
        text
    }
}
