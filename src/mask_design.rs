//! Mask designs arrive from an external decoder as loosely typed field mappings, one per
//! XML element. [`Design::decode`] turns that into a checked structure up front so a bad
//! document fails here with [`MaskError::MalformedDesign`] rather than at some later field
//! access.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::mask::{MaskError, MaskResult, PointingCenter, SlitRecord, TargetRecord, NUM_SLITS};
use crate::mask::slit_to_bars;

pub type FieldMap = BTreeMap<String, String>;

const CENTER_RA_FIELDS: [&str; 3] = ["centerRaH", "centerRaM", "centerRaS"];
const CENTER_DEC_FIELDS: [&str; 3] = ["centerDecD", "centerDecM", "centerDecS"];
const TARGET_RA_FIELDS: [&str; 3] = ["targetRaH", "targetRaM", "targetRaS"];
const TARGET_DEC_FIELDS: [&str; 3] = ["targetDecD", "targetDecM", "targetDecS"];

/// A mascgen argument is either plain element text or the element's attributes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MascgenValue {
    Text(String),
    Attributes(BTreeMap<String, String>),
}

/// The decoded document exactly as the external decoder hands it over.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawDesign {
    #[serde(default)]
    pub mask_description: Option<FieldMap>,
    #[serde(default)]
    pub mascgen_arguments: BTreeMap<String, MascgenValue>,
    #[serde(default)]
    pub mechanical_slit_config: Vec<FieldMap>,
    #[serde(default)]
    pub science_slit_config: Vec<FieldMap>,
    #[serde(default)]
    pub alignment: Vec<FieldMap>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    name: String,
    priority: Option<f64>,
    position_angle: f64,
    pointing_center: Option<PointingCenter>,
    mascgen_arguments: BTreeMap<String, MascgenValue>,
    slits: Vec<SlitRecord>,
    science_targets: Vec<TargetRecord>,
    alignment_stars: Vec<TargetRecord>,
}

impl Design {
    pub fn from_json(json: &str) -> MaskResult<Self> {
        let raw: RawDesign = serde_json::from_str(json)
            .map_err(|e| MaskError::MalformedDesign(format!("cannot decode design: {e}")))?;
        Design::decode(raw)
    }

    pub fn decode(raw: RawDesign) -> MaskResult<Self> {
        let description = raw
            .mask_description
            .ok_or_else(|| MaskError::MalformedDesign("missing maskDescription".to_owned()))?;
        let description = Fields::new(&description, "maskDescription".to_owned());

        let name = description.required("maskName")?.to_owned();
        let position_angle = description.required_parsed("maskPA")?;
        let priority = description.optional_parsed("totalPriority")?;
        let pointing_center = decode_pointing_center(&description)?;
        debug!("Decoding design {name:?} (PA {position_angle})");

        let mascgen_arguments = raw
            .mascgen_arguments
            .into_iter()
            .map(|(k, v)| match v {
                MascgenValue::Text(text) => (k, MascgenValue::Text(text.trim().to_owned())),
                attrs => (k, attrs),
            })
            .collect();

        let mut seen = BTreeSet::new();
        let mut slits = Vec::with_capacity(raw.mechanical_slit_config.len());
        for (index, map) in raw.mechanical_slit_config.iter().enumerate() {
            let slit = decode_mechanical_slit(&Fields::new(map, format!("mechanicalSlitConfig[{index}]")))?;
            if !seen.insert(slit.slit_number()) {
                return Err(MaskError::MalformedDesign(format!(
                    "mechanicalSlitConfig[{index}]: duplicate slitNumber {}", slit.slit_number())));
            }
            slits.push(slit);
        }

        let science_targets = raw
            .science_slit_config
            .iter()
            .enumerate()
            .map(|(index, map)| decode_target(&Fields::new(map, format!("scienceSlitConfig[{index}]"))))
            .collect::<MaskResult<Vec<_>>>()?;
        let alignment_stars = raw
            .alignment
            .iter()
            .enumerate()
            .map(|(index, map)| decode_target(&Fields::new(map, format!("alignment[{index}]"))))
            .collect::<MaskResult<Vec<_>>>()?;

        debug!(
            "Decoded {} slits, {} science targets, {} alignment stars",
            slits.len(), science_targets.len(), alignment_stars.len());

        Ok(Design {
            name,
            priority,
            position_angle,
            pointing_center,
            mascgen_arguments,
            slits,
            science_targets,
            alignment_stars,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> Option<f64> {
        self.priority
    }

    pub fn position_angle(&self) -> f64 {
        self.position_angle
    }

    pub fn pointing_center(&self) -> Option<&PointingCenter> {
        self.pointing_center.as_ref()
    }

    pub fn mascgen_arguments(&self) -> &BTreeMap<String, MascgenValue> {
        &self.mascgen_arguments
    }

    pub fn slits(&self) -> &[SlitRecord] {
        &self.slits
    }

    pub fn science_targets(&self) -> &[TargetRecord] {
        &self.science_targets
    }

    pub fn alignment_stars(&self) -> &[TargetRecord] {
        &self.alignment_stars
    }
}

struct Fields<'a> {
    map: &'a FieldMap,
    context: String,
}

impl<'a> Fields<'a> {
    fn new(map: &'a FieldMap, context: String) -> Self {
        Self { map, context }
    }

    fn malformed(&self, message: String) -> MaskError {
        MaskError::MalformedDesign(format!("{}: {}", self.context, message))
    }

    /// Blank values count as absent.
    fn get(&self, key: &str) -> Option<&'a str> {
        self.map.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> MaskResult<&'a str> {
        self.get(key).ok_or_else(|| self.malformed(format!("missing {key}")))
    }

    fn parse<T: FromStr>(&self, key: &str, value: &str) -> MaskResult<T> {
        value.parse().map_err(|_| self.malformed(format!("bad {key} value {value:?}")))
    }

    fn required_parsed<T: FromStr>(&self, key: &str) -> MaskResult<T> {
        self.parse(key, self.required(key)?)
    }

    fn optional_parsed<T: FromStr>(&self, key: &str) -> MaskResult<Option<T>> {
        self.get(key).map(|value| self.parse(key, value)).transpose()
    }

    /// Joins three component fields as `a:b:c`.
    fn sexagesimal(&self, keys: &[&str; 3]) -> MaskResult<String> {
        let parts = keys.iter().map(|k| self.required(k)).collect::<MaskResult<Vec<_>>>()?;
        Ok(parts.join(":"))
    }
}

fn decode_pointing_center(description: &Fields) -> MaskResult<Option<PointingCenter>> {
    let present = CENTER_RA_FIELDS
        .iter()
        .chain(CENTER_DEC_FIELDS.iter())
        .filter(|k| description.get(k).is_some())
        .count();
    match present {
        0 => Ok(None),
        6 => Ok(Some(PointingCenter {
            ra: description.sexagesimal(&CENTER_RA_FIELDS)?,
            dec: description.sexagesimal(&CENTER_DEC_FIELDS)?,
        })),
        _ => Err(description.malformed("incomplete pointing center".to_owned())),
    }
}

fn decode_mechanical_slit(fields: &Fields) -> MaskResult<SlitRecord> {
    let slit_number: u32 = fields.required_parsed("slitNumber")?;
    if !(1..=NUM_SLITS).contains(&slit_number) {
        return Err(fields.malformed(format!("slitNumber {slit_number} out of range 1..={NUM_SLITS}")));
    }
    let (expected_right, expected_left) = slit_to_bars(slit_number);
    let left_bar_number: u32 = fields.required_parsed("leftBarNumber")?;
    let right_bar_number: u32 = fields.required_parsed("rightBarNumber")?;
    if left_bar_number != expected_left || right_bar_number != expected_right {
        return Err(fields.malformed(format!(
            "bars {left_bar_number}/{right_bar_number} do not belong to slit {slit_number}")));
    }

    let width_arcsec: f64 = fields.required_parsed("slitWidthArcsec")?;
    if !(width_arcsec > 0.0) {
        return Err(fields.malformed(format!("slitWidthArcsec must be positive, got {width_arcsec}")));
    }

    let center_position_arcsec = fields.optional_parsed("centerPositionArcsec")?.unwrap_or(0.0);
    let target = fields.get("target").unwrap_or_default();
    Ok(SlitRecord::new(
        slit_number,
        fields.required_parsed("leftBarPositionMM")?,
        fields.required_parsed("rightBarPositionMM")?,
        center_position_arcsec,
        width_arcsec,
    ).with_target(target))
}

fn decode_target(fields: &Fields) -> MaskResult<TargetRecord> {
    Ok(TargetRecord {
        name: fields.required("targetName")?.to_owned(),
        ra: fields.sexagesimal(&TARGET_RA_FIELDS)?,
        dec: fields.sexagesimal(&TARGET_DEC_FIELDS)?,
        fields: fields.map.clone(),
    })
}
