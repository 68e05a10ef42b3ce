//! Certified boxes exported for rendering, one record per line:
//! `Kind;o0;o1;o2;o3;x_lo;x_hi;y_lo;y_hi;`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CapError, Result};
use crate::interval::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HsetKind {
    Argument,
    Image,
    LeftImage,
    RightImage,
}

impl HsetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HsetKind::Argument => "Argument",
            HsetKind::Image => "Image",
            HsetKind::LeftImage => "LeftImage",
            HsetKind::RightImage => "RightImage",
        }
    }
}

impl FromStr for HsetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Argument" => Ok(HsetKind::Argument),
            "Image" => Ok(HsetKind::Image),
            "LeftImage" => Ok(HsetKind::LeftImage),
            "RightImage" => Ok(HsetKind::RightImage),
            other => Err(format!("Unknown h-set kind '{}'.", other)),
        }
    }
}

/// A 2D box in the local (unstable, stable) plane of the frame at
/// `coordsys_origin`, in physical units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HsetParameters {
    pub kind: HsetKind,
    pub coordsys_origin: [f64; 4],
    /// `[x.lo, x.hi, y.lo, y.hi]`.
    pub coordinates: [f64; 4],
}

impl HsetParameters {
    pub fn from_box(kind: HsetKind, coordsys_origin: [f64; 4], x: Interval, y: Interval) -> Self {
        Self {
            kind,
            coordsys_origin,
            coordinates: [x.lo(), x.hi(), y.lo(), y.hi()],
        }
    }

    pub fn x(&self) -> Result<Interval> {
        Interval::new(self.coordinates[0], self.coordinates[1])
    }

    pub fn y(&self) -> Result<Interval> {
        Interval::new(self.coordinates[2], self.coordinates[3])
    }

    fn parse_fields(line: &str) -> std::result::Result<Self, String> {
        let body = line.trim().strip_suffix(';').unwrap_or(line.trim());
        let fields: Vec<&str> = body.split(';').collect();
        if fields.len() != 9 {
            return Err(format!("Expected 9 fields, found {}.", fields.len()));
        }
        let kind = fields[0].trim().parse::<HsetKind>()?;
        let mut numbers = [0.0; 8];
        for (slot, field) in numbers.iter_mut().zip(&fields[1..]) {
            *slot = field
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("Bad number '{}': {}.", field, e))?;
        }
        Ok(Self {
            kind,
            coordsys_origin: [numbers[0], numbers[1], numbers[2], numbers[3]],
            coordinates: [numbers[4], numbers[5], numbers[6], numbers[7]],
        })
    }
}

impl fmt::Display for HsetParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};", self.kind.as_str())?;
        for v in self.coordsys_origin.iter().chain(self.coordinates.iter()) {
            write!(f, "{};", v)?;
        }
        Ok(())
    }
}

/// A single record carries no position; [`parse_list`] reports line numbers.
impl FromStr for HsetParameters {
    type Err = CapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_fields(s).map_err(|message| {
            CapError::InvalidInput(format!("Malformed h-set record: {}", message))
        })
    }
}

pub fn write_list(records: &[HsetParameters]) -> String {
    records.iter().map(|r| format!("{}\n", r)).collect()
}

pub fn parse_list(text: &str) -> Result<Vec<HsetParameters>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            HsetParameters::parse_fields(line).map_err(|message| CapError::Parse {
                line: i + 1,
                message,
            })
        })
        .collect()
}

/// Record whose frame origin is closest to `origin` in the max norm.
pub fn nearest_by_origin<'a>(
    records: &'a [HsetParameters],
    origin: &[f64; 4],
) -> Option<&'a HsetParameters> {
    let distance = |r: &HsetParameters| {
        r.coordsys_origin
            .iter()
            .zip(origin.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    };
    records
        .iter()
        .min_by(|a, b| distance(a).total_cmp(&distance(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: HsetKind, shift: f64) -> HsetParameters {
        HsetParameters {
            kind,
            coordsys_origin: [0.1 + shift, -0.0, 1.0 / 3.0, 2.5e-7],
            coordinates: [-7.5e-10, 7.5e-10, -1e-12, 3.0000000000000004],
        }
    }

    #[test]
    fn line_roundtrip_is_exact() {
        let r = record(HsetKind::LeftImage, 0.0);
        let line = r.to_string();
        assert!(line.starts_with("LeftImage;0.1;"));
        assert!(line.ends_with(';'));
        let back: HsetParameters = line.parse().expect("parses");
        assert_eq!(back, r);
        assert!(back.coordsys_origin[1].is_sign_negative());
    }

    #[test]
    fn list_skips_blank_lines() {
        let records = vec![record(HsetKind::Argument, 0.0), record(HsetKind::Image, 1.0)];
        let text = format!("\n{}\n   \n", write_list(&records));
        assert_eq!(parse_list(&text).expect("parses"), records);
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let text = format!("{}\nImage;1;2;3\n", record(HsetKind::Argument, 0.0));
        let err = parse_list(&text).expect_err("short line");
        assert!(matches!(err, CapError::Parse { line: 2, .. }));

        let text = format!("\n{}\n\nBox;0;0;0;0;0;0;0;0;\n", record(HsetKind::Argument, 0.0));
        let err = parse_list(&text).expect_err("unknown kind");
        assert!(matches!(err, CapError::Parse { line: 4, .. }));

        let err = "Box;0;0;0;0;0;0;0;0;"
            .parse::<HsetParameters>()
            .expect_err("unknown kind");
        assert!(matches!(err, CapError::InvalidInput(ref m) if m.starts_with("Malformed h-set record")));
    }

    #[test]
    fn nearest_record_by_origin() {
        let records = vec![
            record(HsetKind::Argument, 0.0),
            record(HsetKind::Argument, 0.5),
            record(HsetKind::Argument, 1.0),
        ];
        let target = [0.58, 0.0, 1.0 / 3.0, 0.0];
        let nearest = nearest_by_origin(&records, &target).expect("non-empty");
        assert_eq!(nearest.coordsys_origin[0], 0.6);
        assert!(nearest_by_origin(&[], &target).is_none());
    }

    #[test]
    fn boxes_convert_to_intervals() {
        let r = HsetParameters::from_box(
            HsetKind::Image,
            [0.0; 4],
            Interval::new(-2.0, 1.0).expect("valid"),
            Interval::point(0.5),
        );
        assert_eq!(r.coordinates, [-2.0, 1.0, 0.5, 0.5]);
        assert_eq!(r.x().expect("ordered").width(), 3.0);
        assert_eq!(r.y().expect("ordered"), Interval::point(0.5));
    }
}
