use std::collections::BTreeMap;
use std::ops::Range;

use serde::Serialize;
use thiserror::Error;

use crate::mask_design::MascgenValue;

/// Linear bar travel per arcsecond of on-sky offset.
pub const MM_PER_ARCSEC: f64 = 0.507 / 0.7;
pub const BAR0_OFFSET_MM: f64 = 145.82707536231888;
pub const BAR_PITCH_MM: f64 = -0.17768476719087264;
pub const SLIT_PITCH_ARCSEC: f64 = 0.490454545;

pub const NUM_SLITS: u32 = 46;
pub const NUM_BARS: usize = 92;
pub const REFERENCE_WIDTH_ARCSEC: f64 = 0.7;
pub const DEFAULT_RANDOM_SLIT_WIDTH: f64 = 0.7;

pub const OPEN_LEFT_MM: f64 = 270.400;
pub const OPEN_RIGHT_MM: f64 = 4.000;

pub const RANDOM_CENTER_RANGE: Range<i32> = 54..220;

/// Linear fit from a slit's mean bar position (mm) to its on-sky center (arcsec).
pub const MEASURED_CENTER_ZERO_ARCSEC: f64 = 189.62934431020133;
pub const MEASURED_CENTER_ARCSEC_PER_MM: f64 = -1.3801254681363402;

pub const ALIGNMENT_REFERENCE_SLIT: u32 = 23;
pub const ALIGNMENT_BOX_INSET_ARCSEC: f64 = 1.65;
pub const ALIGNMENT_BOX_WIDTH_ARCSEC: f64 = 4.0;

#[derive(Error, PartialEq, Clone, Debug)]
pub enum MaskError {
    #[error("invalid mask spec: {0}")]
    InvalidSpec(String),
    #[error("cannot place alignment box: slit {reference_slit} is not in the slit table")]
    AlignmentBox { reference_slit: u32 },
    #[error("malformed mask design: {0}")]
    MalformedDesign(String),
}

pub type MaskResult<T> = Result<T, MaskError>;

/// Left and right bar numbers for a slit, `(right, left)` = `(2s - 1, 2s)`.
pub fn slit_to_bars(slit_number: u32) -> (u32, u32) {
    (slit_number * 2 - 1, slit_number * 2)
}

pub fn bar_to_slit(bar_number: u32) -> u32 {
    (bar_number + 1) / 2
}

/// One row of the mechanical slit table.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SlitRecord {
    slit_number: u32,
    left_bar_number: u32,
    right_bar_number: u32,
    left_bar_position_mm: f64,
    right_bar_position_mm: f64,
    center_position_arcsec: f64,
    width_arcsec: f64,
    target: String,
}

impl SlitRecord {
    /// Bar numbers are always derived from the slit number.
    pub(crate) fn new(
        slit_number: u32,
        left_bar_position_mm: f64,
        right_bar_position_mm: f64,
        center_position_arcsec: f64,
        width_arcsec: f64,
    ) -> Self {
        let (right_bar_number, left_bar_number) = slit_to_bars(slit_number);
        Self {
            slit_number,
            left_bar_number,
            right_bar_number,
            left_bar_position_mm,
            right_bar_position_mm,
            center_position_arcsec,
            width_arcsec,
            target: String::new(),
        }
    }

    pub(crate) fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn slit_number(&self) -> u32 {
        self.slit_number
    }

    pub fn left_bar_number(&self) -> u32 {
        self.left_bar_number
    }

    pub fn right_bar_number(&self) -> u32 {
        self.right_bar_number
    }

    pub fn left_bar_position_mm(&self) -> f64 {
        self.left_bar_position_mm
    }

    pub fn right_bar_position_mm(&self) -> f64 {
        self.right_bar_position_mm
    }

    pub fn center_position_arcsec(&self) -> f64 {
        self.center_position_arcsec
    }

    pub fn width_arcsec(&self) -> f64 {
        self.width_arcsec
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

/// The wide pointing-check aperture placed over the central slit of a long slit.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AlignmentBoxRecord {
    pub mech_slit_number: u32,
    pub left_bar_number: u32,
    pub right_bar_number: u32,
    pub left_bar_position_mm: f64,
    pub right_bar_position_mm: f64,
    pub center_position_arcsec: f64,
    pub width_arcsec: f64,
    pub target_center_distance: f64,
}

impl AlignmentBoxRecord {
    pub(crate) fn around(reference: &SlitRecord) -> Self {
        let inset_mm = ALIGNMENT_BOX_INSET_ARCSEC * MM_PER_ARCSEC;
        let (right_bar_number, left_bar_number) = slit_to_bars(ALIGNMENT_REFERENCE_SLIT);
        Self {
            mech_slit_number: reference.slit_number,
            left_bar_number,
            right_bar_number,
            left_bar_position_mm: reference.left_bar_position_mm - inset_mm,
            right_bar_position_mm: reference.right_bar_position_mm + inset_mm,
            center_position_arcsec: 0.0,
            width_arcsec: ALIGNMENT_BOX_WIDTH_ARCSEC,
            target_center_distance: 0.0,
        }
    }
}

/// A science or alignment-star target taken from a mask design.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TargetRecord {
    pub name: String,
    pub ra: String,
    pub dec: String,
    /// Every field of the decoded record, untouched.
    pub fields: BTreeMap<String, String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlignmentTarget {
    Box(AlignmentBoxRecord),
    Star(TargetRecord),
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PointingCenter {
    pub ra: String,
    pub dec: String,
}

/// A fully built slit mask. Constructed once by
/// [`MaskGeometryBuilder`](crate::mask_builder::MaskGeometryBuilder) and never mutated.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Mask {
    pub(crate) name: String,
    pub(crate) priority: Option<f64>,
    pub(crate) position_angle: Option<f64>,
    pub(crate) pointing_center: Option<PointingCenter>,
    pub(crate) mascgen_arguments: BTreeMap<String, MascgenValue>,
    pub(crate) slit_table: Vec<SlitRecord>,
    pub(crate) alignment_targets: Vec<AlignmentTarget>,
    pub(crate) science_targets: Vec<TargetRecord>,
}

impl Mask {
    pub(crate) fn synthesized(name: String, slit_table: Vec<SlitRecord>) -> Self {
        Self {
            name,
            priority: None,
            position_angle: None,
            pointing_center: None,
            mascgen_arguments: BTreeMap::new(),
            slit_table,
            alignment_targets: Vec::new(),
            science_targets: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Option<f64> {
        self.priority
    }

    pub fn position_angle(&self) -> Option<f64> {
        self.position_angle
    }

    pub fn pointing_center(&self) -> Option<&PointingCenter> {
        self.pointing_center.as_ref()
    }

    pub fn mascgen_arguments(&self) -> &BTreeMap<String, MascgenValue> {
        &self.mascgen_arguments
    }

    pub fn slit_table(&self) -> &[SlitRecord] {
        &self.slit_table
    }

    pub fn alignment_targets(&self) -> &[AlignmentTarget] {
        &self.alignment_targets
    }

    pub fn science_targets(&self) -> &[TargetRecord] {
        &self.science_targets
    }

    pub fn slit(&self, slit_number: u32) -> Option<&SlitRecord> {
        self.slit_table.iter().find(|s| s.slit_number == slit_number)
    }

    pub fn alignment_box(&self) -> Option<&AlignmentBoxRecord> {
        self.alignment_targets.iter().find_map(|t| match t {
            AlignmentTarget::Box(b) => Some(b),
            AlignmentTarget::Star(_) => None,
        })
    }
}
