// Controller envelopes: spreading a list of controller values across an
// event's duration.
//
// A slot declares up to four controller sequences (pitch wheel, pan,
// modulation wheel, expression). Each sequence is turned into a list of
// (value, duration) segments that tile the slot's duration exactly:
//
// - one value holds for the whole duration
// - two values: the first holds for D-1 ms, the second is pinned to the final
//   millisecond
// - more values: breakpoints at even subdivisions of [0, D-1] (rounded half
//   up), then D-1, then D
//
// Adjacent segments with the same value are merged ("agglomeration"), so the
// serializer never sends a redundant controller message. A segment of zero
// length would be a message with no audible effect; the quantizer refuses to
// produce one.
//
// `CarryState` remembers the last value sent per controller across the slots
// of one pass. A slot whose values all equal the carried value emits nothing
// for that controller. The pipeline owns the carry and threads it through
// `distribute` slot by slot.

use crate::chord::MIDI_MAX;
use crate::error::ResolveError;
use crate::palette::ControllerValues;
use serde::Serialize;
use tracing::trace;

/// The continuous controllers a slot can shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Controller {
    PitchWheel = 0,
    Pan = 1,
    Modulation = 2,
    Expression = 3,
}

impl Controller {
    pub const ALL: [Controller; 4] = [
        Controller::PitchWheel,
        Controller::Pan,
        Controller::Modulation,
        Controller::Expression,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Controller::PitchWheel => "pitch wheel",
            Controller::Pan => "pan",
            Controller::Modulation => "modulation wheel",
            Controller::Expression => "expression",
        }
    }
}

/// One constant-value stretch of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnvelopeSegment {
    pub value: u8,
    pub duration_ms: u32,
}

impl EnvelopeSegment {
    pub fn new(value: u8, duration_ms: u32) -> Self {
        EnvelopeSegment { value, duration_ms }
    }
}

/// Spread `values` over `duration_ms` and merge equal neighbours.
///
/// An empty `values` yields an empty envelope.
pub fn quantize(values: &[u8], duration_ms: u32) -> Result<Vec<EnvelopeSegment>, ResolveError> {
    if let Some(&bad) = values.iter().find(|&&v| v > MIDI_MAX) {
        return Err(ResolveError::config(
            "controller value",
            format!("{bad} exceeds {MIDI_MAX}"),
        ));
    }

    let n = values.len();
    let durations = match n {
        0 => return Ok(Vec::new()),
        1 => vec![duration_ms],
        2 => {
            if duration_ms < 2 {
                return Err(ResolveError::Precondition(format!(
                    "two controller values need more than {duration_ms}ms"
                )));
            }
            vec![duration_ms - 1, 1]
        }
        _ => {
            if duration_ms < 3 {
                return Err(ResolveError::Precondition(format!(
                    "{n} controller values need more than {duration_ms}ms"
                )));
            }
            segment_durations(n, duration_ms)
        }
    };

    let raw = values
        .iter()
        .zip(durations)
        .map(|(&value, duration_ms)| EnvelopeSegment { value, duration_ms })
        .collect();
    let segments = agglomerate(raw);

    if segments.iter().any(|s| s.duration_ms == 0) {
        return Err(ResolveError::Precondition(format!(
            "{n} controller values cannot be spread over {duration_ms}ms without a zero-length segment"
        )));
    }
    Ok(segments)
}

/// Durations for `n > 2` values over `total` ms.
///
/// Breakpoints `round(k * (total - 1) / (n - 1))` for `k` in `0..n-1`, then
/// `total - 1` and `total`.
fn segment_durations(n: usize, total: u32) -> Vec<u32> {
    let span = (total - 1) as u64;
    let steps = (n - 1) as u64;
    let mut breakpoints: Vec<u64> = (0..steps)
        .map(|k| (2 * k * span + steps) / (2 * steps))
        .collect();
    breakpoints.push(span);
    breakpoints.push(total as u64);
    breakpoints
        .windows(2)
        .map(|w| w[1].saturating_sub(w[0]) as u32)
        .collect()
}

/// Merge each segment into its predecessor when they share a value,
/// scanning from the end.
pub fn agglomerate(segments: Vec<EnvelopeSegment>) -> Vec<EnvelopeSegment> {
    let mut merged: Vec<EnvelopeSegment> = Vec::with_capacity(segments.len());
    for segment in segments.into_iter().rev() {
        match merged.last_mut() {
            Some(later) if later.value == segment.value => {
                later.duration_ms += segment.duration_ms;
            }
            _ => merged.push(segment),
        }
    }
    merged.reverse();
    merged
}

/// Last value sent on each controller during the current pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CarryState {
    values: [Option<u8>; 4],
}

impl CarryState {
    pub fn get(&self, controller: Controller) -> Option<u8> {
        self.values[controller.index()]
    }

    /// A copy of this state with `controller` set to `value`.
    pub fn with(mut self, controller: Controller, value: u8) -> Self {
        self.values[controller.index()] = Some(value);
        self
    }
}

/// The envelopes one slot emits. `None` means nothing is sent for that
/// controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ControllerEnvelopes {
    envelopes: [Option<Vec<EnvelopeSegment>>; 4],
}

impl ControllerEnvelopes {
    pub fn get(&self, controller: Controller) -> Option<&[EnvelopeSegment]> {
        self.envelopes[controller.index()].as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.envelopes.iter().all(Option::is_none)
    }

    /// Emitted envelopes in controller order.
    pub fn iter(&self) -> impl Iterator<Item = (Controller, &[EnvelopeSegment])> {
        Controller::ALL
            .into_iter()
            .filter_map(|c| self.get(c).map(|segments| (c, segments)))
    }
}

/// Quantize one controller sequence, unless every value equals `carried`.
///
/// Returns the envelope to emit (if any) and the new carried value.
pub fn emit_envelope(
    values: &[u8],
    duration_ms: u32,
    carried: Option<u8>,
) -> Result<(Option<Vec<EnvelopeSegment>>, Option<u8>), ResolveError> {
    if values.is_empty() {
        return Ok((None, carried));
    }
    if let Some(current) = carried {
        if values.iter().all(|&v| v == current) {
            return Ok((None, carried));
        }
    }
    let segments = quantize(values, duration_ms)?;
    let last = segments.last().map(|s| s.value);
    Ok((Some(segments), last))
}

/// Build all four envelopes for one slot, threading the carry state.
pub fn distribute(
    values: &ControllerValues,
    duration_ms: u32,
    carry: CarryState,
) -> Result<(ControllerEnvelopes, CarryState), ResolveError> {
    let mut envelopes = ControllerEnvelopes::default();
    let mut carry = carry;
    for controller in Controller::ALL {
        let values = values.get(controller);
        let (envelope, carried) = emit_envelope(values, duration_ms, carry.get(controller))
            .map_err(|e| match e {
                ResolveError::Configuration { message, .. } => ResolveError::Configuration {
                    parameter: controller.name(),
                    message,
                },
                other => other,
            })?;
        if envelope.is_none() && !values.is_empty() {
            trace!(controller = controller.name(), "controller unchanged, skipped");
        }
        if let Some(value) = carried {
            carry = carry.with(controller, value);
        }
        envelopes.envelopes[controller.index()] = envelope;
    }
    Ok((envelopes, carry))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segs(pairs: &[(u8, u32)]) -> Vec<EnvelopeSegment> {
        pairs.iter().map(|&(v, d)| EnvelopeSegment::new(v, d)).collect()
    }

    fn assert_invariants(segments: &[EnvelopeSegment], total: u32) {
        assert_eq!(segments.iter().map(|s| s.duration_ms).sum::<u32>(), total);
        assert!(segments.iter().all(|s| s.duration_ms > 0));
        assert!(segments.windows(2).all(|w| w[0].value != w[1].value));
    }

    #[test]
    fn test_single_value_spans_duration() {
        assert_eq!(quantize(&[64], 500).unwrap(), segs(&[(64, 500)]));
        assert_eq!(quantize(&[64], 1).unwrap(), segs(&[(64, 1)]));
    }

    #[test]
    fn test_two_values_pin_last_millisecond() {
        assert_eq!(quantize(&[64, 100], 10).unwrap(), segs(&[(64, 9), (100, 1)]));
    }

    #[test]
    fn test_even_subdivision() {
        // Breakpoints 0, 2, 5 (7/3 rounded), then 7 and 8.
        assert_eq!(
            segment_durations(4, 8),
            vec![2, 3, 2, 1]
        );
        assert_eq!(
            quantize(&[0, 0, 50, 50], 8).unwrap(),
            segs(&[(0, 5), (50, 3)])
        );
    }

    #[test]
    fn test_three_values() {
        // Breakpoints 0, 50 (99/2 rounded half up), 99, 100.
        assert_eq!(
            quantize(&[10, 20, 30], 100).unwrap(),
            segs(&[(10, 50), (20, 49), (30, 1)])
        );
    }

    #[test]
    fn test_envelope_invariants_hold() {
        let values = [0u8, 10, 10, 20, 127, 127, 3, 64, 64];
        for total in 9..400 {
            let segments = quantize(&values, total).unwrap();
            assert_invariants(&segments, total);
        }
    }

    #[test]
    fn test_all_equal_collapses() {
        assert_eq!(quantize(&[5, 5, 5, 5], 40).unwrap(), segs(&[(5, 40)]));
    }

    #[test]
    fn test_agglomerate_idempotent() {
        let raw = segs(&[(1, 3), (1, 2), (2, 4), (2, 1), (1, 5), (3, 1), (3, 1)]);
        let once = agglomerate(raw);
        assert_eq!(once, segs(&[(1, 5), (2, 5), (1, 5), (3, 2)]));
        assert_eq!(agglomerate(once.clone()), once);
    }

    #[test]
    fn test_too_short_is_precondition() {
        let err = quantize(&[1, 2], 1).unwrap_err();
        assert!(matches!(err, ResolveError::Precondition(_)));
        let err = quantize(&[1, 2, 3], 2).unwrap_err();
        assert!(matches!(err, ResolveError::Precondition(_)));
        // More distinct values than milliseconds must not yield empty segments.
        let err = quantize(&[1, 2, 3, 4, 5, 6], 4).unwrap_err();
        assert!(matches!(err, ResolveError::Precondition(_)));
    }

    #[test]
    fn test_zero_length_segment_absorbed_by_merge() {
        // Breakpoints 0, 1, 1, 2, 3: the empty second segment shares its
        // value with the first and disappears in the merge.
        assert_eq!(segment_durations(4, 3), vec![1, 0, 1, 1]);
        assert_eq!(quantize(&[0, 0, 50, 50], 3).unwrap(), segs(&[(0, 1), (50, 2)]));
    }

    #[test]
    fn test_out_of_range_value() {
        let err = quantize(&[64, 128], 10).unwrap_err();
        assert!(matches!(err, ResolveError::Configuration { .. }));
    }

    #[test]
    fn test_write_skip_when_carried() {
        let (envelope, carried) = emit_envelope(&[64, 64], 100, Some(64)).unwrap();
        assert!(envelope.is_none());
        assert_eq!(carried, Some(64));

        let (envelope, carried) = emit_envelope(&[64, 70], 100, Some(64)).unwrap();
        assert_eq!(envelope.unwrap(), segs(&[(64, 99), (70, 1)]));
        assert_eq!(carried, Some(70));

        let (envelope, carried) = emit_envelope(&[64], 100, None).unwrap();
        assert_eq!(envelope.unwrap(), segs(&[(64, 100)]));
        assert_eq!(carried, Some(64));
    }

    #[test]
    fn test_empty_sequence_keeps_carry() {
        let (envelope, carried) = emit_envelope(&[], 100, Some(12)).unwrap();
        assert!(envelope.is_none());
        assert_eq!(carried, Some(12));
    }

    #[test]
    fn test_distribute_threads_carry() {
        let values = ControllerValues {
            pan: vec![0, 127],
            expression: vec![100],
            ..Default::default()
        };
        let (first, carry) = distribute(&values, 50, CarryState::default()).unwrap();
        assert_eq!(first.get(Controller::Pan).unwrap(), &segs(&[(0, 49), (127, 1)])[..]);
        assert_eq!(first.get(Controller::Expression).unwrap(), &segs(&[(100, 50)])[..]);
        assert!(first.get(Controller::PitchWheel).is_none());
        assert_eq!(carry.get(Controller::Pan), Some(127));
        assert_eq!(carry.get(Controller::Expression), Some(100));

        // Same expression again: skipped. Pan restarts from 0: emitted.
        let (second, carry) = distribute(&values, 50, carry).unwrap();
        assert!(second.get(Controller::Expression).is_none());
        assert!(second.get(Controller::Pan).is_some());
        assert_eq!(carry.get(Controller::Expression), Some(100));
        assert_eq!(second.iter().count(), 1);
    }

    #[test]
    fn test_distribute_names_controller_in_error() {
        let values = ControllerValues {
            modulation: vec![200],
            ..Default::default()
        };
        let err = distribute(&values, 10, CarryState::default()).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Configuration {
                parameter: "modulation wheel",
                ..
            }
        ));
    }
}
