//! Capture-rig profiles
//!
//! A profile pairs a stream-metadata predicate with the region of interest
//! recorded by that rig. Profiles are kept in declaration order; the first
//! profile whose predicate holds for a probed stream is the one applied.

use crate::error::{Error, Result};
use crate::probe::StreamInfo;
use crate::processing::{MaskShape, ScalingPolicy};
use crate::types::{OrderedMap, Sar, Scalar};
use serde::{Deserialize, Serialize};

/// Largest term tried when approximating a drawn aspect ratio
const MAX_SAR_TERM: f64 = 1000.0;

/// Declarative description of one capture rig
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "ProfileRepr")]
pub struct Profile {
    #[serde(skip)]
    pub name: String,
    /// Scaling the geometry was authored under
    pub reference: ScalingPolicy,
    /// Authoritative SAR, overriding the stream's
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sar: Option<Sar>,
    /// Fill-outside circle `[x0, y0, diameter]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circ: Option<[f64; 3]>,
    /// Stream field -> expected value
    #[serde(rename = "match")]
    pub match_fields: OrderedMap<Scalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inkscape: Option<InkscapeCircle>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shapes: Vec<MaskShape>,
}

/// Region of interest resolved for a concrete frame height
#[derive(Debug, Clone, PartialEq)]
pub struct RegionOfInterest {
    pub sar: Option<Sar>,
    pub shapes: Vec<MaskShape>,
    pub reference: ScalingPolicy,
}

impl Profile {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_sar(mut self, sar: Sar) -> Self {
        self.sar = Some(sar);
        self
    }

    pub fn with_circ(mut self, x0: f64, y0: f64, diameter: f64) -> Self {
        self.circ = Some([x0, y0, diameter]);
        self
    }

    pub fn with_shape(mut self, shape: MaskShape) -> Self {
        self.shapes.push(shape);
        self
    }

    pub fn with_match(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.match_fields.insert(field, value.into());
        self
    }

    pub fn with_inkscape(mut self, inkscape: InkscapeCircle) -> Self {
        self.inkscape = Some(inkscape);
        self
    }

    pub fn with_reference(mut self, reference: ScalingPolicy) -> Self {
        self.reference = reference;
        self
    }

    /// Check every predicate against the stream's stringified fields.
    /// A field the stream does not report never matches.
    ///
    /// Both sides are stringified through [`Scalar`]'s `Display`, so a float
    /// predicate with no fraction (`1080.0`) matches the integer `1080`, and
    /// booleans compare as lowercase `true`/`false`.
    pub fn matches(&self, info: &StreamInfo) -> bool {
        self.match_fields
            .iter()
            .all(|(field, expected)| info.field(field).is_some_and(|v| v == expected.to_string()))
    }

    /// Collect the mask shapes for a frame `frame_height` pixels tall.
    ///
    /// Explicit shapes come first, then the `circ` circle. A drawn inkscape
    /// circle is only used when there is no `circ`, and its SAR only when
    /// there is no `sar`.
    pub fn region_of_interest(&self, frame_height: u32) -> Result<RegionOfInterest> {
        let mut shapes = self.shapes.clone();
        let mut sar = self.sar;

        if let Some([x0, y0, d]) = self.circ {
            shapes.push(MaskShape::circle(x0, y0, d));
        }

        if let Some(ink) = &self.inkscape {
            let drawn = ink.sar()?;
            if sar.is_none() && !drawn.is_square() {
                sar = Some(drawn);
            }
            if self.circ.is_none() {
                if let Some([x0, y0, d]) = ink.to_circ(frame_height)? {
                    shapes.push(MaskShape::circle(x0, y0, d));
                }
            }
        }

        if shapes.is_empty() {
            return Err(Error::NoRegionOfInterest(self.name.clone()));
        }

        Ok(RegionOfInterest {
            sar,
            shapes,
            reference: self.reference,
        })
    }
}

/// A circle drawn in a vector editor over a screenshot of the recording
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InkscapeCircle {
    /// Page (screenshot) size `[width, height]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<[f64; 2]>,
    /// Drawn ellipse bounding box `[x, y, width, height]` in page units
    pub circ: [f64; 4],
}

impl InkscapeCircle {
    pub fn new(page: [f64; 2], circ: [f64; 4]) -> Self {
        Self {
            page: Some(page),
            circ,
        }
    }

    /// SAR implied by how much the drawn circle is squashed
    pub fn sar(&self) -> Result<Sar> {
        let [_, _, w, h] = self.circ;
        if w <= 0.0 || h <= 0.0 {
            return Err(Error::InvalidGeometry(format!(
                "drawn circle has size {}x{}",
                w, h
            )));
        }
        approximate_sar(h / w)
    }

    /// Map the drawing onto the upscaled frame of a `frame_height` tall
    /// recording, as a `[x0, y0, diameter]` circle. `None` without a page.
    pub fn to_circ(&self, frame_height: u32) -> Result<Option<[f64; 3]>> {
        let Some([pw, ph]) = self.page else {
            return Ok(None);
        };
        if pw <= 0.0 || ph <= 0.0 {
            return Err(Error::InvalidGeometry(format!("inkscape page {}x{}", pw, ph)));
        }
        if frame_height == 0 {
            return Ok(None);
        }

        let sar = self.sar()?.as_f64();
        let height = frame_height as f64;
        let width = (height * pw / ph).round();
        let [cx, cy, cw, ch] = self.circ;

        let mut x0 = cx / pw * width;
        let mut y0 = cy / ph * height;
        let diameter = if sar < 1.0 {
            y0 /= sar;
            cw / pw * width
        } else {
            x0 *= sar;
            ch / ph * height
        };

        Ok(Some([x0.round(), y0.round(), (diameter / 2.0).round() * 2.0]))
    }
}

/// Nearest ratio of the form `i/(i+1)` (below 1) or `(i+1)/i` (above 1).
///
/// Only ratios strictly between 1/2 and 2 have such an approximation.
pub fn approximate_sar(ratio: f64) -> Result<Sar> {
    if !(ratio > 0.5 && ratio < 2.0) {
        return Err(Error::InvalidGeometry(format!(
            "aspect ratio {} is outside (1/2, 2)",
            ratio
        )));
    }
    if ratio == 1.0 {
        return Ok(Sar::SQUARE);
    }

    if ratio < 1.0 {
        // largest i with i/(i+1) < ratio
        let i = ((ratio / (1.0 - ratio)).ceil() - 1.0).clamp(1.0, MAX_SAR_TERM);
        let below = i / (i + 1.0);
        let above = (i + 1.0) / (i + 2.0);
        let i = i as u32;
        if ratio - below < above - ratio {
            Sar::new(i, i + 1)
        } else {
            Sar::new(i + 1, i + 2)
        }
    } else {
        // largest i with ratio < (i+1)/i
        let i = ((1.0 / (ratio - 1.0)).ceil() - 1.0).clamp(1.0, MAX_SAR_TERM);
        let above = (i + 1.0) / i;
        let below = (i + 2.0) / (i + 1.0);
        let i = i as u32;
        if above - ratio < ratio - below {
            Sar::new(i + 1, i)
        } else {
            Sar::new(i + 2, i + 1)
        }
    }
}

/// Profiles as written in option files: a table, or the legacy
/// `[match, format]` pair.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileRepr {
    Table(ProfileTable),
    Pair(OrderedMap<Scalar>, LegacyFormat),
}

#[derive(Deserialize)]
struct ProfileTable {
    #[serde(default)]
    reference: ScalingPolicy,
    sar: Option<Sar>,
    circ: Option<[f64; 3]>,
    #[serde(rename = "match", default)]
    match_fields: OrderedMap<Scalar>,
    inkscape: Option<InkscapeCircle>,
    #[serde(default)]
    shapes: Vec<MaskShape>,
}

#[derive(Deserialize)]
struct LegacyFormat {
    sar: Option<Sar>,
    circ: Option<[f64; 3]>,
    #[serde(rename = "inkscape-page")]
    inkscape_page: Option<[f64; 2]>,
    #[serde(rename = "inkscape-circ")]
    inkscape_circ: Option<[f64; 4]>,
}

impl From<ProfileRepr> for Profile {
    fn from(repr: ProfileRepr) -> Self {
        match repr {
            ProfileRepr::Table(t) => Profile {
                name: String::new(),
                reference: t.reference,
                sar: t.sar,
                circ: t.circ,
                match_fields: t.match_fields,
                inkscape: t.inkscape,
                shapes: t.shapes,
            },
            ProfileRepr::Pair(match_fields, format) => Profile {
                name: String::new(),
                reference: ScalingPolicy::Upscale,
                sar: format.sar,
                circ: format.circ,
                match_fields,
                inkscape: format.inkscape_circ.map(|circ| InkscapeCircle {
                    page: format.inkscape_page,
                    circ,
                }),
                shapes: Vec::new(),
            },
        }
    }
}

/// Named profiles in declaration order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "OrderedMap<Profile>", into = "OrderedMap<Profile>")]
pub struct ProfileSet {
    profiles: OrderedMap<Profile>,
}

impl ProfileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The rigs the tool knows out of the box
    pub fn builtin() -> Self {
        let mut set = Self::new();
        if let Ok(sar) = Sar::new(8, 9) {
            set.insert(
                Profile::named("Toshiba Kalare (1080p)")
                    .with_match("height", 1080)
                    .with_sar(sar)
                    .with_circ(396.0, 92.0, 1144.0),
            );
        }
        set.insert(
            Profile::named("Siemens Axiom (480p)")
                .with_match("height", 480)
                .with_circ(45.0, 8.0, 530.0),
        );
        set
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter().map(|(_, p)| p)
    }

    /// Insert under the profile's name; an existing profile keeps its position
    pub fn insert(&mut self, profile: Profile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    pub fn merge(&mut self, other: ProfileSet) {
        self.profiles.merge(other.profiles);
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl From<OrderedMap<Profile>> for ProfileSet {
    fn from(map: OrderedMap<Profile>) -> Self {
        map.iter()
            .map(|(name, p)| Profile {
                name: name.to_string(),
                ..p.clone()
            })
            .collect()
    }
}

impl From<ProfileSet> for OrderedMap<Profile> {
    fn from(set: ProfileSet) -> Self {
        set.profiles
    }
}

impl FromIterator<Profile> for ProfileSet {
    fn from_iter<I: IntoIterator<Item = Profile>>(iter: I) -> Self {
        let mut set = Self::new();
        for profile in iter {
            set.insert(profile);
        }
        set
    }
}

/// First profile, in declaration order, whose predicate holds for `info`
pub fn match_profile<'a>(info: &StreamInfo, profiles: &'a ProfileSet) -> Result<&'a Profile> {
    let found = profiles.iter().find(|p| p.matches(info));
    match found {
        Some(profile) => {
            tracing::debug!("{} matched profile '{}'", info, profile.name);
            Ok(profile)
        }
        None => Err(Error::NoMatchingProfile(info.to_string())),
    }
}
