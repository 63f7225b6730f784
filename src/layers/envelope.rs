//! Fade envelope shape
//!
//! Linear fade-in from 0 and linear fade-out to 0 over a span. The live
//! scheduler turns the shape into gain automation breakpoints; the offline
//! mixer evaluates it per frame. Both use the same function so exports
//! sound like playback.

/// Gain of the fade envelope at `position` seconds into a span of `span` seconds
///
/// Returns 0 outside the span. Where fade-in and fade-out overlap the
/// lower of the two ramps wins.
pub fn fade_gain(position: f64, span: f64, fade_in: f64, fade_out: f64) -> f32 {
    if !(0.0..=span).contains(&position) {
        return 0.0;
    }
    let rising = if fade_in > 0.0 {
        position / fade_in
    } else {
        1.0
    };
    let falling = if fade_out > 0.0 {
        (span - position) / fade_out
    } else {
        1.0
    };
    rising.min(falling).clamp(0.0, 1.0) as f32
}

/// One point of a piecewise-linear envelope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    /// Seconds after the voice starts
    pub at: f64,
    /// Envelope gain at that instant
    pub gain: f32,
}

/// Breakpoints reproducing [`fade_gain`] from `elapsed` to the end of `span`
///
/// `elapsed` is how far into the span playback begins, so a voice started
/// mid-clip picks up a fade already in progress instead of restarting it.
/// The first point is at 0 (the voice start); linear ramps between
/// consecutive points reproduce the shape exactly.
pub fn envelope_breakpoints(elapsed: f64, span: f64, fade_in: f64, fade_out: f64) -> Vec<Breakpoint> {
    let elapsed = elapsed.clamp(0.0, span.max(0.0));
    let mut knees = vec![elapsed, span];

    let fade_out_start = span - fade_out;
    knees.push(fade_in);
    knees.push(fade_out_start);
    if fade_in > 0.0 && fade_out > 0.0 && fade_in + fade_out > span {
        // Where the rising and falling ramps cross
        knees.push(span * fade_in / (fade_in + fade_out));
    }

    knees.retain(|&t| t >= elapsed && t <= span);
    knees.sort_by(|a, b| a.total_cmp(b));
    knees.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

    knees
        .into_iter()
        .map(|t| Breakpoint {
            at: t - elapsed,
            gain: fade_gain(t, span, fade_in, fade_out),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fade_gain_shape() {
        // 5s clip with 1s fades
        assert_relative_eq!(fade_gain(0.0, 5.0, 1.0, 1.0), 0.0);
        assert_relative_eq!(fade_gain(0.5, 5.0, 1.0, 1.0), 0.5);
        assert_relative_eq!(fade_gain(1.0, 5.0, 1.0, 1.0), 1.0);
        assert_relative_eq!(fade_gain(2.5, 5.0, 1.0, 1.0), 1.0);
        assert_relative_eq!(fade_gain(4.0, 5.0, 1.0, 1.0), 1.0);
        assert_relative_eq!(fade_gain(4.5, 5.0, 1.0, 1.0), 0.5);
        assert_relative_eq!(fade_gain(5.0, 5.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_fade_gain_without_fades_is_flat() {
        assert_eq!(fade_gain(0.0, 3.0, 0.0, 0.0), 1.0);
        assert_eq!(fade_gain(3.0, 3.0, 0.0, 0.0), 1.0);
        assert_eq!(fade_gain(3.1, 3.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_breakpoints_full_clip() {
        let points = envelope_breakpoints(0.0, 5.0, 1.0, 1.0);
        let expected = [(0.0, 0.0), (1.0, 1.0), (4.0, 1.0), (5.0, 0.0)];
        assert_eq!(points.len(), expected.len());
        for (point, (at, gain)) in points.iter().zip(expected) {
            assert_relative_eq!(point.at, at, epsilon = 1e-9);
            assert_relative_eq!(point.gain, gain);
        }
    }

    #[test]
    fn test_breakpoints_resume_mid_fade_in() {
        let points = envelope_breakpoints(0.5, 5.0, 1.0, 1.0);
        assert_relative_eq!(points[0].at, 0.0);
        assert_relative_eq!(points[0].gain, 0.5);
        assert_relative_eq!(points[1].at, 0.5, epsilon = 1e-9);
        assert_relative_eq!(points[1].gain, 1.0);
        assert_relative_eq!(points.last().unwrap().at, 4.5, epsilon = 1e-9);
    }

    #[test]
    fn test_breakpoints_resume_mid_fade_out() {
        let points = envelope_breakpoints(4.5, 5.0, 1.0, 1.0);
        assert_eq!(points.len(), 2);
        assert_relative_eq!(points[0].gain, 0.5);
        assert_relative_eq!(points[1].at, 0.5, epsilon = 1e-9);
        assert_relative_eq!(points[1].gain, 0.0);
    }

    #[test]
    fn test_breakpoints_overlapping_fades_peak_at_crossover() {
        // Loop clip shorter than its fades: ramps cross at 2/3 of the span
        let points = envelope_breakpoints(0.0, 1.5, 2.0, 1.0);
        let peak = points
            .iter()
            .max_by(|a, b| a.gain.total_cmp(&b.gain))
            .unwrap();
        assert_relative_eq!(peak.at, 1.0, epsilon = 1e-9);
        assert_relative_eq!(peak.gain, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_breakpoints_match_shape_between_points() {
        let points = envelope_breakpoints(0.3, 4.0, 0.8, 1.7);
        for pair in points.windows(2) {
            let mid = (pair[0].at + pair[1].at) / 2.0;
            let interpolated = (pair[0].gain + pair[1].gain) / 2.0;
            assert_relative_eq!(
                interpolated,
                fade_gain(mid + 0.3, 4.0, 0.8, 1.7),
                epsilon = 1e-5
            );
        }
    }
}
