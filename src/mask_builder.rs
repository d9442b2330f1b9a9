use log::debug;
use rand::{thread_rng, Rng};

use crate::mask::*;
use crate::mask_design::Design;
use crate::mask_spec::{check_long_slit, check_slit_width, MaskSpec};

/// Turns a [`MaskSpec`] into a complete [`Mask`]. Pure apart from the random draw used by
/// [`MaskSpec::Random`], which can be seeded through [`MaskGeometryBuilder::build_with_rng`].
pub struct MaskGeometryBuilder;

impl MaskGeometryBuilder {
    pub fn build(spec: &MaskSpec) -> MaskResult<Mask> {
        Self::build_with_rng(spec, &mut thread_rng())
    }

    pub fn build_with_rng<R: Rng + ?Sized>(spec: &MaskSpec, rng: &mut R) -> MaskResult<Mask> {
        debug!("Building mask from {spec}");
        match spec {
            MaskSpec::Open => Ok(build_open()),
            MaskSpec::Random { slit_width } => build_random(*slit_width, rng),
            MaskSpec::LongSlit { width, length } => build_long_slit(*width, *length),
            MaskSpec::Design(design) => Ok(build_from_design(design)),
        }
    }

    /// Reconstructs a mask from measured bar positions, indexed by bar number - 1.
    pub fn from_bar_positions(name: &str, positions_mm: &[f64; NUM_BARS]) -> Mask {
        let slits = (1..=NUM_SLITS)
            .map(|slit_number| {
                let (right_bar, left_bar) = slit_to_bars(slit_number);
                let left_mm = positions_mm[left_bar as usize - 1];
                let right_mm = positions_mm[right_bar as usize - 1];
                let center_mm = (left_mm + right_mm) / 2.0;
                let center = MEASURED_CENTER_ZERO_ARCSEC + MEASURED_CENTER_ARCSEC_PER_MM * center_mm;
                SlitRecord::new(slit_number, left_mm, right_mm, center, (left_mm - right_mm) / MM_PER_ARCSEC)
            })
            .collect();
        Mask::synthesized(name.to_owned(), slits)
    }
}

fn build_open() -> Mask {
    let width_arcsec = (OPEN_LEFT_MM - OPEN_RIGHT_MM) / MM_PER_ARCSEC;
    let slits = (1..=NUM_SLITS)
        .map(|slit_number| SlitRecord::new(slit_number, OPEN_LEFT_MM, OPEN_RIGHT_MM, 0.0, width_arcsec))
        .collect();
    Mask::synthesized("OPEN".to_owned(), slits)
}

/// Adjacent slits never share a center, but nothing stops their extents overlapping.
fn build_random<R: Rng + ?Sized>(slit_width: f64, rng: &mut R) -> MaskResult<Mask> {
    check_slit_width(slit_width)?;
    let half_width_mm = slit_width * MM_PER_ARCSEC;

    let mut slits: Vec<SlitRecord> = Vec::with_capacity(NUM_SLITS as usize);
    let mut previous_center = None;
    for slit_number in 1..=NUM_SLITS {
        let mut center = rng.gen_range(RANDOM_CENTER_RANGE);
        while Some(center) == previous_center {
            center = rng.gen_range(RANDOM_CENTER_RANGE);
        }
        previous_center = Some(center);

        let center = f64::from(center);
        let left_mm = center + half_width_mm;
        let right_mm = center - half_width_mm;
        let width_arcsec = (left_mm - right_mm) / MM_PER_ARCSEC;
        slits.push(SlitRecord::new(slit_number, left_mm, right_mm, center, width_arcsec));
    }
    Ok(Mask::synthesized("RANDOM".to_owned(), slits))
}

/// Slit numbers for a long slit, growing outward from the center slit: 23, 24, 22, 25, ...
fn long_slit_numbers(length: u32) -> impl Iterator<Item = u32> {
    (0..length).map(|i| {
        if i % 2 == 0 {
            ALIGNMENT_REFERENCE_SLIT - i / 2
        } else {
            ALIGNMENT_REFERENCE_SLIT + (i + 1) / 2
        }
    })
}

fn build_long_slit(width: f64, length: u32) -> MaskResult<Mask> {
    check_long_slit(width, length)?;
    let width_mm = width * MM_PER_ARCSEC;
    let slits: Vec<SlitRecord> = long_slit_numbers(length)
        .map(|slit_number| {
            let (_, left_bar) = slit_to_bars(slit_number);
            let left_mm = BAR0_OFFSET_MM
                + BAR_PITCH_MM * f64::from(left_bar)
                + (width - REFERENCE_WIDTH_ARCSEC) / 2.0 * MM_PER_ARCSEC;
            let right_mm = left_mm - width_mm;
            let center = (f64::from(slit_number) - f64::from(ALIGNMENT_REFERENCE_SLIT)) * SLIT_PITCH_ARCSEC;
            SlitRecord::new(slit_number, left_mm, right_mm, center, width)
        })
        .collect();

    let reference = slits
        .iter()
        .find(|s| s.slit_number() == ALIGNMENT_REFERENCE_SLIT)
        .ok_or(MaskError::AlignmentBox { reference_slit: ALIGNMENT_REFERENCE_SLIT })?;
    let alignment_box = AlignmentBoxRecord::around(reference);

    // Named from the parsed values, so equivalent descriptors share one name.
    let mut mask = Mask::synthesized(format!("LONGSLIT-{width}x{length}"), slits);
    mask.alignment_targets.push(AlignmentTarget::Box(alignment_box));
    Ok(mask)
}

fn build_from_design(design: &Design) -> Mask {
    Mask {
        name: design.name().to_owned(),
        priority: design.priority(),
        position_angle: Some(design.position_angle()),
        pointing_center: design.pointing_center().cloned(),
        mascgen_arguments: design.mascgen_arguments().clone(),
        slit_table: design.slits().to_vec(),
        alignment_targets: design.alignment_stars().iter().cloned().map(AlignmentTarget::Star).collect(),
        science_targets: design.science_targets().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use crate::mask_design::{FieldMap, RawDesign};

    use super::*;

    const EPSILON: f64 = 1e-9;

    fn long_slit(width: f64, length: u32) -> MaskResult<Mask> {
        MaskGeometryBuilder::build(&MaskSpec::LongSlit { width, length })
    }

    #[test]
    fn test_open() {
        let mask = MaskGeometryBuilder::build(&MaskSpec::Open).unwrap();
        assert_eq!(mask.name(), "OPEN");
        assert_eq!(mask.slit_table().len(), 46);
        assert!(mask.alignment_targets().is_empty());
        let expected_width = (270.400 - 4.000) * 0.7 / 0.507;
        for (i, slit) in mask.slit_table().iter().enumerate() {
            assert_eq!(slit.slit_number(), i as u32 + 1);
            assert_eq!(slit.left_bar_position_mm(), 270.4);
            assert_eq!(slit.right_bar_position_mm(), 4.0);
            assert_eq!(slit.center_position_arcsec(), 0.0);
            assert!((slit.width_arcsec() - expected_width).abs() < EPSILON);
        }
    }

    #[test]
    fn test_random_adjacent_centers_differ() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let mask = MaskGeometryBuilder::build_with_rng(&MaskSpec::random(), &mut rng).unwrap();
            assert_eq!(mask.name(), "RANDOM");
            let slits = mask.slit_table();
            assert_eq!(slits.len(), 46);
            for slit in slits {
                assert!((54.0..220.0).contains(&slit.center_position_arcsec()));
                assert_eq!(slit.center_position_arcsec().fract(), 0.0);
                assert!(slit.left_bar_position_mm() > slit.right_bar_position_mm());
                assert!((slit.width_arcsec() - 1.4).abs() < EPSILON);
            }
            for pair in slits.windows(2) {
                assert_ne!(pair[0].center_position_arcsec(), pair[1].center_position_arcsec());
            }
        }
    }

    #[test]
    fn test_random_is_reproducible_with_seed() {
        let a = MaskGeometryBuilder::build_with_rng(&MaskSpec::random(), &mut StdRng::seed_from_u64(42)).unwrap();
        let b = MaskGeometryBuilder::build_with_rng(&MaskSpec::random(), &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_random_rejects_bad_width() {
        let spec = MaskSpec::Random { slit_width: 0.0 };
        assert!(matches!(MaskGeometryBuilder::build(&spec), Err(MaskError::InvalidSpec(_))));
    }

    #[test]
    fn test_long_slit_order() {
        let mask = long_slit(0.7, 6).unwrap();
        let numbers: Vec<u32> = mask.slit_table().iter().map(|s| s.slit_number()).collect();
        assert_eq!(numbers, vec![23, 24, 22, 25, 21, 26]);
    }

    #[test]
    fn test_long_slit_bar_numbers() {
        for length in 2..=46 {
            let mask = long_slit(0.7, length).unwrap();
            let slits = mask.slit_table();
            assert_eq!(slits.len(), length as usize);
            let unique: BTreeSet<u32> = slits.iter().map(|s| s.slit_number()).collect();
            assert_eq!(unique.len(), length as usize);
            for slit in slits {
                assert!((1..=46).contains(&slit.slit_number()));
                assert_eq!(slit.left_bar_number(), 2 * slit.slit_number());
                assert_eq!(slit.right_bar_number(), slit.left_bar_number() - 1);
                assert!(slit.left_bar_position_mm() > slit.right_bar_position_mm());
            }
        }
    }

    #[test]
    fn test_long_slit_positions() {
        let mask = long_slit(1.0, 3).unwrap();
        assert_eq!(mask.name(), "LONGSLIT-1x3");
        let slit = mask.slit(24).unwrap();
        let expected_left = 145.82707536231888 - 0.17768476719087264 * 48.0 + 0.15 * 0.507 / 0.7;
        assert!((slit.left_bar_position_mm() - expected_left).abs() < EPSILON);
        assert!((slit.right_bar_position_mm() - (expected_left - 0.507 / 0.7)).abs() < EPSILON);
        assert!((slit.center_position_arcsec() - 0.490454545).abs() < EPSILON);
        assert_eq!(slit.width_arcsec(), 1.0);
        assert_eq!(mask.slit(23).unwrap().center_position_arcsec(), 0.0);
    }

    #[test]
    fn test_long_slit_alignment_box() {
        let mask = long_slit(0.7, 46).unwrap();
        assert_eq!(mask.name(), "LONGSLIT-0.7x46");
        let slit23 = mask.slit(23).unwrap();
        let alignment_box = mask.alignment_box().unwrap();
        let inset = 1.65 * (0.507 / 0.7);
        assert!((slit23.left_bar_position_mm() - alignment_box.left_bar_position_mm - inset).abs() < EPSILON);
        assert!((alignment_box.right_bar_position_mm - slit23.right_bar_position_mm() - inset).abs() < EPSILON);
        assert_eq!(alignment_box.left_bar_number, 46);
        assert_eq!(alignment_box.right_bar_number, 45);
        assert_eq!(alignment_box.width_arcsec, 4.0);
        assert_eq!(mask.alignment_targets().len(), 1);
    }

    #[test]
    fn test_long_slit_parsed_matches_explicit() {
        let parsed: MaskSpec = "0.7x46".parse().unwrap();
        let from_text = MaskGeometryBuilder::build(&parsed).unwrap();
        let explicit = long_slit(0.7, 46).unwrap();
        assert_eq!(from_text.slit_table(), explicit.slit_table());
        assert_eq!(from_text, explicit);
    }

    #[test]
    fn test_long_slit_name_is_canonical() {
        for (text, name) in [("1.0x3", "LONGSLIT-1x3"), ("0.70x46", "LONGSLIT-0.7x46"), ("0.7X46", "LONGSLIT-0.7x46")] {
            let spec: MaskSpec = text.parse().unwrap();
            assert_eq!(MaskGeometryBuilder::build(&spec).unwrap().name(), name);
        }
    }

    #[test]
    fn test_long_slit_invalid() {
        assert!(matches!(long_slit(-1.0, 10), Err(MaskError::InvalidSpec(_))));
        assert!(matches!(long_slit(1.0, 47), Err(MaskError::InvalidSpec(_))));
    }

    #[test]
    fn test_long_slit_single_slit_is_centered() {
        let mask = long_slit(0.7, 1).unwrap();
        assert_eq!(mask.slit_table().len(), 1);
        assert_eq!(mask.slit_table()[0].slit_number(), 23);
        assert!(mask.alignment_box().is_some());
    }

    #[test]
    fn test_long_slit_without_reference_slit() {
        assert_eq!(long_slit(0.7, 0), Err(MaskError::AlignmentBox { reference_slit: 23 }));
    }

    #[test]
    fn test_from_bar_positions() {
        let mut positions = [0.0; NUM_BARS];
        for (i, position) in positions.iter_mut().enumerate() {
            // odd bar numbers sit on the right, 0.507 mm (0.7") below their partner
            *position = if i % 2 == 0 { 137.0 } else { 137.507 };
        }
        let mask = MaskGeometryBuilder::from_bar_positions("measured", &positions);
        assert_eq!(mask.name(), "measured");
        assert_eq!(mask.slit_table().len(), 46);
        let slit = mask.slit(10).unwrap();
        assert_eq!(slit.left_bar_number(), 20);
        assert_eq!(slit.left_bar_position_mm(), 137.507);
        assert_eq!(slit.right_bar_position_mm(), 137.0);
        assert!((slit.width_arcsec() - 0.7).abs() < EPSILON);
        let expected_center = 189.62934431020133 - 1.3801254681363402 * 137.2535;
        assert!((slit.center_position_arcsec() - expected_center).abs() < EPSILON);
    }

    #[test]
    fn test_design_is_copied() {
        let field_map = |pairs: &[(&str, &str)]| -> FieldMap {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };
        let star = field_map(&[
            ("targetName", "align_1"),
            ("targetRaH", "12"), ("targetRaM", "34"), ("targetRaS", "56"),
            ("targetDecD", "+10"), ("targetDecM", "20"), ("targetDecS", "30"),
        ]);
        let design = Design::decode(RawDesign {
            mask_description: Some(field_map(&[("maskName", "designed"), ("maskPA", "30.5")])),
            mechanical_slit_config: vec![field_map(&[
                ("slitNumber", "1"),
                ("leftBarNumber", "2"),
                ("rightBarNumber", "1"),
                ("leftBarPositionMM", "150.0"),
                ("rightBarPositionMM", "149.5"),
                ("slitWidthArcsec", "0.7"),
            ])],
            science_slit_config: vec![star.clone()],
            alignment: vec![star],
            ..Default::default()
        }).unwrap();

        let mask = MaskGeometryBuilder::build(&MaskSpec::Design(design.clone())).unwrap();
        assert_eq!(mask.name(), "designed");
        assert_eq!(mask.position_angle(), Some(30.5));
        assert_eq!(mask.slit_table(), design.slits());
        assert_eq!(mask.science_targets()[0].ra, "12:34:56");
        assert_eq!(mask.science_targets()[0].dec, "+10:20:30");
        match &mask.alignment_targets()[0] {
            AlignmentTarget::Star(star) => assert_eq!(star.dec, "+10:20:30"),
            other => panic!("expected an alignment star, got {other:?}"),
        }
        assert!(mask.alignment_box().is_none());
    }
}
