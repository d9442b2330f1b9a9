use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::mask::{MaskError, MaskResult, DEFAULT_RANDOM_SLIT_WIDTH, NUM_SLITS};
use crate::mask_design::Design;

const LONG_SLIT_RE: &str = r"^\s*([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\s*[xX]\s*([-+]?[0-9]+)\s*$";

/// What mask to build.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskSpec {
    Open,
    /// Slit width in arcseconds.
    Random { slit_width: f64 },
    /// Width in arcseconds, length in mechanical slits.
    LongSlit { width: f64, length: u32 },
    Design(Design),
}

impl MaskSpec {
    pub fn random() -> Self {
        MaskSpec::Random { slit_width: DEFAULT_RANDOM_SLIT_WIDTH }
    }

    /// A validated long slit spec.
    pub fn long_slit(width: f64, length: u32) -> MaskResult<Self> {
        check_long_slit(width, length)?;
        Ok(MaskSpec::LongSlit { width, length })
    }
}

pub(crate) fn check_long_slit(width: f64, length: u32) -> MaskResult<()> {
    if length > NUM_SLITS {
        return Err(MaskError::InvalidSpec(format!(
            "long slit length {length} exceeds the {NUM_SLITS} available slits")));
    }
    check_slit_width(width)
}

pub(crate) fn check_slit_width(width: f64) -> MaskResult<()> {
    if !width.is_finite() || width <= 0.0 {
        return Err(MaskError::InvalidSpec(format!("slit width must be positive, got {width}")));
    }
    Ok(())
}

impl FromStr for MaskSpec {
    type Err = MaskError;

    /// Parses `OPEN`, `OPEN MASK`, `RAND`, `RANDOM` or a long slit `WIDTHxLENGTH` such as
    /// `0.7x46`. Design files are decoded separately, see [`Design::from_json`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_uppercase().as_str() {
            "OPEN" | "OPEN MASK" => return Ok(MaskSpec::Open),
            "RAND" | "RANDOM" => return Ok(MaskSpec::random()),
            _ => {}
        }

        let re = Regex::new(LONG_SLIT_RE)
            .map_err(|e| MaskError::InvalidSpec(e.to_string()))?;
        let caps = re
            .captures(trimmed)
            .ok_or_else(|| MaskError::InvalidSpec(format!("unable to parse {s:?}")))?;
        let width: f64 = caps[1]
            .parse()
            .map_err(|_| MaskError::InvalidSpec(format!("bad slit width in {s:?}")))?;
        let length: i64 = caps[2]
            .parse()
            .map_err(|_| MaskError::InvalidSpec(format!("bad slit length in {s:?}")))?;
        let length = u32::try_from(length)
            .map_err(|_| MaskError::InvalidSpec(format!("slit length must not be negative in {s:?}")))?;
        MaskSpec::long_slit(width, length)
    }
}

impl fmt::Display for MaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskSpec::Open => write!(f, "OPEN"),
            MaskSpec::Random { slit_width } => write!(f, "RANDOM({slit_width})"),
            MaskSpec::LongSlit { width, length } => write!(f, "{width}x{length}"),
            MaskSpec::Design(design) => write!(f, "design {}", design.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_modes() {
        assert_eq!("open".parse::<MaskSpec>().unwrap(), MaskSpec::Open);
        assert_eq!("Open Mask".parse::<MaskSpec>().unwrap(), MaskSpec::Open);
        assert_eq!("RAND".parse::<MaskSpec>().unwrap(), MaskSpec::Random { slit_width: 0.7 });
        assert_eq!(" random ".parse::<MaskSpec>().unwrap(), MaskSpec::random());
    }

    #[test]
    fn test_long_slit() {
        assert_eq!("0.7x46".parse::<MaskSpec>().unwrap(), MaskSpec::LongSlit { width: 0.7, length: 46 });
        assert_eq!("1X10".parse::<MaskSpec>().unwrap(), MaskSpec::LongSlit { width: 1.0, length: 10 });
        assert_eq!(".5x3".parse::<MaskSpec>().unwrap(), MaskSpec::LongSlit { width: 0.5, length: 3 });
    }

    #[test]
    fn test_long_slit_out_of_range() {
        assert!(matches!("1x47".parse::<MaskSpec>(), Err(MaskError::InvalidSpec(_))));
        assert!(matches!("-1x10".parse::<MaskSpec>(), Err(MaskError::InvalidSpec(_))));
        assert!(matches!("0x10".parse::<MaskSpec>(), Err(MaskError::InvalidSpec(_))));
        assert!(matches!("0.7x-3".parse::<MaskSpec>(), Err(MaskError::InvalidSpec(_))));
    }

    #[test]
    fn test_garbage() {
        assert!(matches!("".parse::<MaskSpec>(), Err(MaskError::InvalidSpec(_))));
        assert!(matches!("0.7by46".parse::<MaskSpec>(), Err(MaskError::InvalidSpec(_))));
        assert!(matches!("my_mask.xml".parse::<MaskSpec>(), Err(MaskError::InvalidSpec(_))));
    }

    #[test]
    fn test_explicit_constructor_checks_range() {
        assert!(MaskSpec::long_slit(0.7, 46).is_ok());
        assert!(matches!(MaskSpec::long_slit(-1.0, 10), Err(MaskError::InvalidSpec(_))));
        assert!(matches!(MaskSpec::long_slit(1.0, 47), Err(MaskError::InvalidSpec(_))));
        assert!(matches!(MaskSpec::long_slit(f64::NAN, 4), Err(MaskError::InvalidSpec(_))));
    }

    #[test]
    fn test_display() {
        assert_eq!(MaskSpec::LongSlit { width: 0.7, length: 46 }.to_string(), "0.7x46");
        assert_eq!(MaskSpec::Open.to_string(), "OPEN");
    }
}
