//! Timeline Duration
//!
//! The timeline is at least ten seconds long and always covers every
//! clip. A manual override can lengthen it but never cut a clip off.

use crate::error::{LayerdeckError, Result};

use super::layer::Layer;

/// Shortest timeline, in seconds
pub const MIN_TIMELINE_SECS: f64 = 10.0;

/// Timeline length derived from layer extents
pub fn computed_duration(layers: &[Layer]) -> f64 {
    layers
        .iter()
        .map(Layer::end_time)
        .filter(|end| end.is_finite())
        .fold(MIN_TIMELINE_SECS, f64::max)
}

/// Timeline length used for playback and export sizing
pub fn effective_duration(layers: &[Layer], manual_override: Option<f64>) -> f64 {
    let computed = computed_duration(layers);
    match manual_override {
        Some(manual) if manual.is_finite() => computed.max(manual),
        _ => computed,
    }
}

/// Parse `"S"`, `"M:SS"` or `"H:MM:SS"` into seconds
///
/// An empty (or all-whitespace) string means "no override" and yields
/// `Ok(None)`. Components must be plain digits; in the multi-part forms
/// every part after the first must be below 60.
///
/// # Example
/// ```
/// use layerdeck::layers::timeline::parse_time;
/// assert_eq!(parse_time("1:30").unwrap(), Some(90.0));
/// assert_eq!(parse_time("").unwrap(), None);
/// assert!(parse_time("1:75").is_err());
/// ```
pub fn parse_time(input: &str) -> Result<Option<f64>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let invalid = |reason: &str| LayerdeckError::InvalidTimeString {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() > 3 {
        return Err(invalid("expected S, M:SS or H:MM:SS"));
    }

    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("components must be numeric"));
        }
        let value: u64 = part
            .parse()
            .map_err(|_| invalid("component out of range"))?;
        values.push(value);
    }

    if values.iter().skip(1).any(|&v| v >= 60) {
        return Err(invalid("minutes and seconds must be below 60"));
    }

    let seconds = values.iter().fold(0u64, |acc, &v| acc.saturating_mul(60).saturating_add(v));
    Ok(Some(seconds as f64))
}

/// Format seconds as `M:SS`, or `H:MM:SS` from one hour up
pub fn format_time(seconds: f64) -> String {
    let total = if seconds.is_finite() {
        seconds.max(0.0).floor() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Manual duration override with the clamping rules applied
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimelineDuration {
    manual_override: Option<f64>,
}

impl TimelineDuration {
    /// No override: the timeline follows the layers
    pub fn new() -> Self {
        Self::default()
    }

    /// Current override, if any
    pub fn manual_override(&self) -> Option<f64> {
        self.manual_override
    }

    /// Set the override from a human time string
    ///
    /// An empty string clears the override. A malformed string is rejected
    /// and leaves the current override untouched. A value shorter than the
    /// layers (or than ten seconds) is raised to fit.
    pub fn set_from_str(&mut self, input: &str, layers: &[Layer]) -> Result<()> {
        match parse_time(input)? {
            Some(seconds) => self.set(Some(seconds), layers),
            None => self.manual_override = None,
        }
        Ok(())
    }

    /// Set (or clear) the override in seconds
    pub fn set(&mut self, seconds: Option<f64>, layers: &[Layer]) {
        self.manual_override = seconds
            .filter(|s| s.is_finite())
            .map(|s| s.max(computed_duration(layers)));
    }

    /// Effective timeline length for the given layers
    pub fn effective(&self, layers: &[Layer]) -> f64 {
        effective_duration(layers, self.manual_override)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::{AudioBuffer, ChannelLayout};
    use crate::layers::layer::{LayerId, LayerSpec};
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use test_case::test_case;

    fn layer_at(start: f64, secs: f64) -> Layer {
        let source = Arc::new(AudioBuffer::new(
            (secs * 1000.0) as usize,
            ChannelLayout::Mono,
            1000,
        ));
        LayerSpec::new("clip", source).at(start).build(LayerId::new())
    }

    #[test]
    fn test_empty_timeline_is_ten_seconds() {
        assert_eq!(computed_duration(&[]), MIN_TIMELINE_SECS);
        assert_eq!(effective_duration(&[], None), MIN_TIMELINE_SECS);
    }

    #[test]
    fn test_duration_covers_last_layer() {
        let layers = vec![layer_at(2.0, 3.0), layer_at(12.0, 4.5)];
        assert_relative_eq!(computed_duration(&layers), 16.5);
    }

    #[test]
    fn test_override_cannot_shrink_timeline() {
        let layers = vec![layer_at(12.0, 4.0)];
        assert_relative_eq!(effective_duration(&layers, Some(5.0)), 16.0);
        assert_relative_eq!(effective_duration(&layers, Some(60.0)), 60.0);
    }

    #[test_case("", None ; "empty clears")]
    #[test_case("  ", None ; "whitespace clears")]
    #[test_case("45", Some(45.0) ; "seconds")]
    #[test_case("90", Some(90.0) ; "bare seconds above a minute")]
    #[test_case("1:05", Some(65.0) ; "minutes and seconds")]
    #[test_case("01:00:30", Some(3630.0) ; "hours minutes seconds")]
    #[test_case("2:00:00", Some(7200.0) ; "two hours")]
    fn test_parse_time_valid(input: &str, expected: Option<f64>) {
        assert_eq!(parse_time(input).unwrap(), expected);
    }

    #[test_case("1:60" ; "seconds too large")]
    #[test_case("1:75:00" ; "minutes too large")]
    #[test_case("abc" ; "not numeric")]
    #[test_case("1.5" ; "decimal")]
    #[test_case("-5" ; "negative")]
    #[test_case("1::2" ; "empty component")]
    #[test_case("1:2:3:4" ; "too many components")]
    fn test_parse_time_invalid(input: &str) {
        let err = parse_time(input).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TIME_STRING");
    }

    #[test_case(0.0, "0:00")]
    #[test_case(65.4, "1:05")]
    #[test_case(3630.0, "1:00:30")]
    fn test_format_time(seconds: f64, expected: &str) {
        assert_eq!(format_time(seconds), expected);
    }

    #[test]
    fn test_format_parse_inverse() {
        for secs in [0.0, 59.0, 61.0, 3599.0, 7384.0] {
            assert_eq!(parse_time(&format_time(secs)).unwrap(), Some(secs));
        }
    }

    #[test]
    fn test_set_from_str_rejects_without_change() {
        let layers = vec![layer_at(0.0, 2.0)];
        let mut duration = TimelineDuration::new();
        duration.set_from_str("0:30", &layers).unwrap();
        assert_eq!(duration.manual_override(), Some(30.0));

        assert!(duration.set_from_str("0:99", &layers).is_err());
        assert_eq!(duration.manual_override(), Some(30.0));

        duration.set_from_str("", &layers).unwrap();
        assert_eq!(duration.manual_override(), None);
        assert_eq!(duration.effective(&layers), MIN_TIMELINE_SECS);
    }

    #[test]
    fn test_set_clamps_to_layers() {
        let layers = vec![layer_at(20.0, 5.0)];
        let mut duration = TimelineDuration::new();
        duration.set_from_str("3", &layers).unwrap();
        assert_eq!(duration.manual_override(), Some(25.0));
        assert_eq!(duration.effective(&layers), 25.0);
    }
}
