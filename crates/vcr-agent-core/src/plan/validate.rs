//! Render plan validation.
//!
//! Checks run in a fixed order and every violation is collected:
//! 1. required fields present
//! 2. enumerated fields hold legal literals
//! 3. `resolution` is `WIDTHxHEIGHT` with positive integers
//! 4. `fps` and `duration` are positive numbers
//! 5. derived fields agree with `alpha` / `backend`
//!
//! Consistency is only checked when both sides are present and legal, so a
//! single missing field yields exactly one error.

use vcr_tool::Backend;

use crate::domain::{
    DeterminismMode, FieldError, PlanDraft, PlanField, ProresProfile, RenderPlan, Resolution,
};

const BACKENDS: &str = "{software, gpu, auto}";
const BOOLEANS: &str = "{true, false}";
const PROFILES: &str = "{4444, 422hq}";
const MODES: &str = "{on, off}";

/// Validate `draft`, returning the typed plan or every violation found.
pub fn validate(draft: &PlanDraft) -> Result<RenderPlan, Vec<FieldError>> {
    let mut errors = Vec::new();

    // 1. presence
    for field in PlanField::ALL {
        if draft.get(field).map_or(true, |v| v.trim().is_empty()) {
            errors.push(FieldError::Missing { field });
        }
    }

    let value = |field: PlanField| {
        draft
            .get(field)
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty())
    };

    // 2. enumerations
    let backend = check_enum(&mut errors, PlanField::Backend, value(PlanField::Backend), BACKENDS, |v| {
        v.parse::<Backend>().ok()
    });
    let alpha = check_enum(&mut errors, PlanField::Alpha, value(PlanField::Alpha), BOOLEANS, parse_bool);
    let profile = check_enum(
        &mut errors,
        PlanField::ProresProfile,
        value(PlanField::ProresProfile),
        PROFILES,
        parse_profile,
    );
    let mode = check_enum(
        &mut errors,
        PlanField::DeterminismMode,
        value(PlanField::DeterminismMode),
        MODES,
        parse_mode,
    );

    // 3. resolution
    let resolution = value(PlanField::Resolution).and_then(|v| match v.parse::<Resolution>() {
        Ok(r) => Some(r),
        Err(reason) => {
            errors.push(FieldError::Malformed {
                field: PlanField::Resolution,
                value: v,
                reason,
            });
            None
        }
    });

    // 4. numbers
    let fps = value(PlanField::Fps).and_then(|v| match positive_number(&v) {
        Err(reason) => {
            errors.push(malformed(PlanField::Fps, &v, reason));
            None
        }
        Ok(n) if n.fract() != 0.0 || n > f64::from(u32::MAX) => {
            errors.push(malformed(PlanField::Fps, &v, "should be a whole number of frames"));
            None
        }
        Ok(n) => Some(n as u32),
    });
    let duration = value(PlanField::Duration).and_then(|v| match positive_number(&v) {
        Ok(n) => Some(n),
        Err(reason) => {
            errors.push(malformed(PlanField::Duration, &v, reason));
            None
        }
    });

    // 5. derived consistency
    if let (Some(alpha), Some(profile)) = (alpha, profile) {
        let expected = ProresProfile::for_alpha(alpha);
        if profile != expected {
            errors.push(FieldError::Inconsistent {
                field: PlanField::ProresProfile,
                value: profile.to_string(),
                other: PlanField::Alpha,
                other_value: alpha.to_string(),
                expected: expected.to_string(),
            });
        }
    }
    if let (Some(backend), Some(mode)) = (backend, mode) {
        let expected = DeterminismMode::for_backend(backend);
        if mode != expected {
            errors.push(FieldError::Inconsistent {
                field: PlanField::DeterminismMode,
                value: mode.to_string(),
                other: PlanField::Backend,
                other_value: backend.to_string(),
                expected: expected.to_string(),
            });
        }
    }

    match (resolution, fps, duration, backend, alpha) {
        (Some(resolution), Some(fps), Some(duration), Some(backend), Some(alpha))
            if errors.is_empty() =>
        {
            Ok(RenderPlan::derive(resolution, fps, duration, backend, alpha))
        }
        _ => Err(errors),
    }
}

fn check_enum<T>(
    errors: &mut Vec<FieldError>,
    field: PlanField,
    value: Option<String>,
    allowed: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let value = value?;
    let parsed = parse(&value);
    if parsed.is_none() {
        errors.push(FieldError::IllegalValue {
            field,
            value,
            allowed: allowed.to_string(),
        });
    }
    parsed
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_profile(v: &str) -> Option<ProresProfile> {
    match v {
        "4444" => Some(ProresProfile::P4444),
        "422hq" => Some(ProresProfile::P422Hq),
        _ => None,
    }
}

fn parse_mode(v: &str) -> Option<DeterminismMode> {
    match v {
        "on" => Some(DeterminismMode::On),
        "off" => Some(DeterminismMode::Off),
        _ => None,
    }
}

fn positive_number(v: &str) -> Result<f64, &'static str> {
    let n: f64 = v.parse().map_err(|_| "is not numeric")?;
    if !n.is_finite() || n <= 0.0 {
        return Err("should be a positive number");
    }
    Ok(n)
}

fn malformed(field: PlanField, value: &str, reason: &str) -> FieldError {
    FieldError::Malformed {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
