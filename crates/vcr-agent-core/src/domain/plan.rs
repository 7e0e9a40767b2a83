//! Render plan: the top-level parameters of a render job.
//!
//! `prores_profile` and `determinism_mode` are derived from `alpha` and
//! `backend`. A [`RenderPlan`] only exists after validation, and its derived
//! fields are never settable on their own.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vcr_tool::Backend;

/// ProRes flavour of the rendered `.mov`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProresProfile {
    #[serde(rename = "4444")]
    P4444,
    #[serde(rename = "422hq")]
    P422Hq,
}

impl ProresProfile {
    /// 4444 carries an alpha channel; 422HQ does not.
    pub fn for_alpha(alpha: bool) -> Self {
        if alpha {
            ProresProfile::P4444
        } else {
            ProresProfile::P422Hq
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProresProfile::P4444 => "4444",
            ProresProfile::P422Hq => "422hq",
        }
    }
}

impl fmt::Display for ProresProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the render is reproducible bit-for-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeterminismMode {
    On,
    Off,
}

impl DeterminismMode {
    /// Only the software backend is deterministic.
    pub fn for_backend(backend: Backend) -> Self {
        if backend == Backend::Software {
            DeterminismMode::On
        } else {
            DeterminismMode::Off
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeterminismMode::On => "on",
            DeterminismMode::Off => "off",
        }
    }
}

impl fmt::Display for DeterminismMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const DEFAULT: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Parses `WIDTHxHEIGHT` (case-insensitive `x`) with positive integers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (w, h) = lower
            .split_once('x')
            .ok_or_else(|| "should be WIDTHxHEIGHT".to_string())?;
        let parse = |part: &str| -> Result<u32, String> {
            match part.trim().parse::<u32>() {
                Ok(0) | Err(_) => Err("should be WIDTHxHEIGHT with positive integers".to_string()),
                Ok(v) => Ok(v),
            }
        };
        Ok(Resolution {
            width: parse(w)?,
            height: parse(h)?,
        })
    }
}

impl Serialize for Resolution {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The fields a render plan is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanField {
    Resolution,
    Fps,
    Duration,
    Backend,
    Alpha,
    ProresProfile,
    DeterminismMode,
}

impl PlanField {
    /// Every required field, in validation order.
    pub const ALL: [PlanField; 7] = [
        PlanField::Resolution,
        PlanField::Fps,
        PlanField::Duration,
        PlanField::Backend,
        PlanField::Alpha,
        PlanField::ProresProfile,
        PlanField::DeterminismMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanField::Resolution => "resolution",
            PlanField::Fps => "fps",
            PlanField::Duration => "duration",
            PlanField::Backend => "backend",
            PlanField::Alpha => "alpha",
            PlanField::ProresProfile => "prores_profile",
            PlanField::DeterminismMode => "determinism_mode",
        }
    }

    /// Map a document key to a field. Unknown keys yield `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        PlanField::ALL.into_iter().find(|f| f.as_str() == key)
    }
}

impl fmt::Display for PlanField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unvalidated plan: raw text values keyed by field.
///
/// Both sources of a plan (in-process synthesis and a parsed document) fill
/// a draft; only [`crate::plan::validate`] turns it into a [`RenderPlan`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDraft {
    fields: BTreeMap<PlanField, String>,
}

impl PlanDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: PlanField, value: impl Into<String>) -> &mut Self {
        self.fields.insert(field, value.into());
        self
    }

    pub fn with(mut self, field: PlanField, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    pub fn remove(&mut self, field: PlanField) -> Option<String> {
        self.fields.remove(&field)
    }

    pub fn get(&self, field: PlanField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

impl From<&RenderPlan> for PlanDraft {
    fn from(plan: &RenderPlan) -> Self {
        PlanDraft::new()
            .with(PlanField::Resolution, plan.resolution.to_string())
            .with(PlanField::Fps, plan.fps.to_string())
            .with(PlanField::Duration, plan.duration.to_string())
            .with(PlanField::Backend, plan.backend.as_str())
            .with(PlanField::Alpha, plan.alpha.to_string())
            .with(PlanField::ProresProfile, plan.prores_profile.as_str())
            .with(PlanField::DeterminismMode, plan.determinism_mode.as_str())
    }
}

/// A validated render plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderPlan {
    resolution: Resolution,
    fps: u32,
    duration: f64,
    backend: Backend,
    alpha: bool,
    prores_profile: ProresProfile,
    determinism_mode: DeterminismMode,
}

impl RenderPlan {
    /// Build a plan; derived fields are computed here and nowhere else.
    ///
    /// Range checks live in the validator; callers outside it should go
    /// through a [`PlanDraft`].
    pub(crate) fn derive(
        resolution: Resolution,
        fps: u32,
        duration: f64,
        backend: Backend,
        alpha: bool,
    ) -> Self {
        Self {
            resolution,
            fps,
            duration,
            backend,
            alpha,
            prores_profile: ProresProfile::for_alpha(alpha),
            determinism_mode: DeterminismMode::for_backend(backend),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn alpha(&self) -> bool {
        self.alpha
    }

    pub fn prores_profile(&self) -> ProresProfile {
        self.prores_profile
    }

    pub fn determinism_mode(&self) -> DeterminismMode {
        self.determinism_mode
    }
}
