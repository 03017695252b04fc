//! Raw detector output decoding.
//!
//! Detector runtimes disagree on tensor layout: boxes arrive flat (`K*4`),
//! nested (`[K, 4]`) or batched (`[1, K, 4]`), and scores may sit in any of
//! several output slots. Decoding here never fails: anything that cannot be
//! understood becomes an empty result, which downstream reads as "no
//! detections this frame".

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::result::{BoxCoords, Detection, DetectionResult};

/// One frame of raw detector output, as produced by the external model.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawModelOutput {
    /// Box tensor: `[ymin, xmin, ymax, xmax]` per candidate, normalized.
    #[serde(default)]
    pub boxes: Value,
    /// Confidence tensor, one value per candidate.
    #[serde(default)]
    pub scores: Value,
    /// Optional class-id tensor. Carried for consumers; never read as scores.
    #[serde(default)]
    pub classes: Option<Value>,
    /// Remaining model outputs in model order.
    #[serde(default)]
    pub extra: Vec<Value>,
    #[serde(default)]
    pub frame_index: u64,
}

impl RawModelOutput {
    /// Build from flat `K*4` boxes and `K` scores.
    ///
    /// Non-finite values are carried through as `null` leaves and dropped per
    /// candidate during decoding.
    pub fn from_flat(boxes: &[f32], scores: &[f32], frame_index: u64) -> Self {
        Self {
            boxes: flat_value(boxes),
            scores: flat_value(scores),
            classes: None,
            extra: Vec::new(),
            frame_index,
        }
    }

    /// Build from already-separated boxes and scores.
    pub fn from_boxes(boxes: &[[f32; 4]], scores: &[f32], frame_index: u64) -> Self {
        let flat: Vec<f32> = boxes.iter().flat_map(|b| b.iter().copied()).collect();
        Self::from_flat(&flat, scores, frame_index)
    }
}

fn flat_value(values: &[f32]) -> Value {
    Value::Array(values.iter().map(|v| Value::from(*v as f64)).collect())
}

/// Uniform view of the decoded tensors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NormalizedOutput {
    pub boxes: Vec<[f32; 4]>,
    /// `None` when no score array matching the box count could be found.
    pub scores: Option<Vec<f32>>,
}

impl NormalizedOutput {
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Index of the highest-scoring candidate.
    pub fn best_index(&self) -> Option<usize> {
        self.scores.as_deref().and_then(best_index)
    }
}

/// Decode raw tensors into boxes and (if resolvable) matching scores.
pub fn normalize_output(raw: &RawModelOutput) -> NormalizedOutput {
    let box_sources: Vec<&Value> = std::iter::once(&raw.boxes).chain(raw.extra.iter()).collect();

    let Some((box_slot, boxes)) = box_sources
        .iter()
        .enumerate()
        .find_map(|(slot, source)| parse_boxes(source).map(|boxes| (slot, boxes)))
    else {
        return NormalizedOutput::default();
    };

    let count = boxes.len();
    let mut scores = parse_scores(&raw.scores);
    if scores.as_ref().map(Vec::len) != Some(count) {
        let alternate = raw
            .extra
            .iter()
            .enumerate()
            // extra[i] sits at slot i + 1 in `box_sources`
            .filter(|(i, _)| i + 1 != box_slot)
            .map(|(_, value)| value)
            .filter_map(parse_scores)
            .find(|candidate| candidate.len() == count && looks_like_scores(candidate));
        if alternate.is_none() {
            log::debug!(
                "frame {}: no score array matches {} boxes",
                raw.frame_index,
                count
            );
        }
        scores = alternate;
    }

    NormalizedOutput { boxes, scores }
}

/// Decode raw tensors into detections.
///
/// Candidates with non-finite values are discarded individually. When no
/// score array can be resolved every candidate gets confidence 0.0, which the
/// hazard filter rejects.
pub fn decode_detections(raw: &RawModelOutput) -> DetectionResult {
    let normalized = normalize_output(raw);
    let mut result = DetectionResult {
        frame_index: raw.frame_index,
        ..DetectionResult::default()
    };

    for (i, coords) in normalized.boxes.iter().enumerate() {
        let score = normalized
            .scores
            .as_ref()
            .and_then(|scores| scores.get(i).copied())
            .unwrap_or(0.0);
        match Detection::from_raw(BoxCoords::from_array(*coords), score) {
            Some(det) => result.detections.push(det),
            None => result.discarded += 1,
        }
    }

    if result.discarded > 0 {
        log::debug!(
            "frame {}: discarded {} non-finite candidates",
            raw.frame_index,
            result.discarded
        );
    }
    result
}

/// Index of the maximum finite score; ties resolve to the lowest index.
pub fn best_index(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Direct parse first (`K*4` or `[K, 4]`), then a second pass through a
/// leading batch dimension (`[1, K, 4]` or `[1, K*4]`).
fn parse_boxes(value: &Value) -> Option<Vec<[f32; 4]>> {
    if let Some(boxes) = parse_boxes_direct(value) {
        return Some(boxes);
    }
    match value {
        Value::Array(outer) if outer.len() == 1 => parse_boxes_direct(&outer[0]),
        _ => None,
    }
}

fn parse_boxes_direct(value: &Value) -> Option<Vec<[f32; 4]>> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }

    if let Some(flat) = scalar_leaves(items) {
        if flat.len() % 4 != 0 {
            return None;
        }
        return Some(
            flat.chunks_exact(4)
                .map(|c| [c[0], c[1], c[2], c[3]])
                .collect(),
        );
    }

    items
        .iter()
        .map(|row| {
            let leaves = scalar_leaves(row.as_array()?)?;
            match leaves.as_slice() {
                [a, b, c, d] => Some([*a, *b, *c, *d]),
                _ => None,
            }
        })
        .collect()
}

/// Accepts `[K]`, `[1, K]` and `[K, 1]` layouts.
/// Alternate arrays must hold probabilities; anything outside [0, 1] is an
/// index or count tensor.
fn looks_like_scores(values: &[f32]) -> bool {
    values.iter().all(|v| (0.0..=1.0).contains(v))
}

fn parse_scores(value: &Value) -> Option<Vec<f32>> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }
    if let Some(flat) = scalar_leaves(items) {
        return Some(flat);
    }
    if items.len() == 1 {
        if let Some(inner) = items[0].as_array().and_then(|inner| scalar_leaves(inner)) {
            return Some(inner);
        }
    }
    items
        .iter()
        .map(|row| match row.as_array().map(Vec::as_slice) {
            Some([single]) if !single.is_array() && !single.is_object() => Some(leaf(single)),
            _ => None,
        })
        .collect()
}

/// Returns the values when every element is a scalar leaf.
///
/// Non-numeric scalars (null, bool, string) decode as NaN so that only the
/// affected candidate is dropped later.
fn scalar_leaves(items: &[Value]) -> Option<Vec<f32>> {
    items
        .iter()
        .map(|item| match item {
            Value::Array(_) | Value::Object(_) => None,
            other => Some(leaf(other)),
        })
        .collect()
}

fn leaf(value: &Value) -> f32 {
    value.as_f64().map(|v| v as f32).unwrap_or(f32::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(boxes: Value, scores: Value) -> RawModelOutput {
        RawModelOutput {
            boxes,
            scores,
            ..RawModelOutput::default()
        }
    }

    #[test]
    fn decodes_flat_boxes() {
        let out = normalize_output(&raw(
            json!([0.1, 0.2, 0.5, 0.6, 0.0, 0.0, 0.3, 0.3]),
            json!([0.9, 0.4]),
        ));
        assert_eq!(out.boxes, vec![[0.1, 0.2, 0.5, 0.6], [0.0, 0.0, 0.3, 0.3]]);
        assert_eq!(out.scores, Some(vec![0.9, 0.4]));
    }

    #[test]
    fn decodes_nested_and_batched_boxes() {
        let nested = normalize_output(&raw(json!([[0.1, 0.2, 0.5, 0.6]]), json!([0.7])));
        assert_eq!(nested.boxes.len(), 1);

        let batched = normalize_output(&raw(
            json!([[[0.1, 0.2, 0.5, 0.6], [0.2, 0.2, 0.4, 0.4]]]),
            json!([[0.7, 0.6]]),
        ));
        assert_eq!(batched.boxes.len(), 2);
        assert_eq!(batched.scores, Some(vec![0.7, 0.6]));
    }

    #[test]
    fn falls_back_to_length_matching_alternate_scores() {
        let mut output = raw(json!([[0.1, 0.2, 0.5, 0.6], [0.2, 0.2, 0.4, 0.4]]), json!([3.0]));
        output.extra = vec![json!([0.8, 0.3, 0.1]), json!([0.55, 0.45])];
        let out = normalize_output(&output);
        assert_eq!(out.scores, Some(vec![0.55, 0.45]));
    }

    #[test]
    fn class_ids_are_never_used_as_scores() {
        let mut output = raw(
            json!([[0.3, 0.4, 0.9, 0.6], [0.4, 0.3, 0.9, 0.5]]),
            json!([0.1]),
        );
        output.classes = Some(json!([3, 7]));
        output.extra = vec![json!([1.0, 5.0])];
        let out = normalize_output(&output);
        assert_eq!(out.scores, None);

        let decoded = decode_detections(&output);
        assert_eq!(decoded.detections.len(), 2);
        assert!(decoded.detections.iter().all(|d| d.confidence == 0.0));
    }

    #[test]
    fn missing_scores_yield_none() {
        let out = normalize_output(&raw(json!([0.1, 0.2, 0.5, 0.6]), Value::Null));
        assert_eq!(out.boxes.len(), 1);
        assert_eq!(out.scores, None);

        let decoded = decode_detections(&raw(json!([0.1, 0.2, 0.5, 0.6]), Value::Null));
        assert_eq!(decoded.detections[0].confidence, 0.0);
    }

    #[test]
    fn malformed_boxes_yield_empty_output() {
        for boxes in [
            json!(null),
            json!("boxes"),
            json!([]),
            json!([0.1, 0.2, 0.3]),
            json!([[0.1, 0.2, 0.3]]),
            json!({"ymin": 0.1}),
            json!([[[[0.1, 0.2, 0.3, 0.4]]]]),
        ] {
            let out = normalize_output(&raw(boxes, json!([0.5])));
            assert!(out.is_empty());
            assert_eq!(out.scores, None);
        }
    }

    #[test]
    fn non_finite_candidates_are_dropped_individually() {
        let output = RawModelOutput::from_flat(
            &[0.1, 0.2, 0.5, 0.6, f32::NAN, 0.0, 0.3, 0.3, 0.2, 0.2, 0.4, 0.4],
            &[0.9, 0.8, f32::INFINITY],
            7,
        );
        let decoded = decode_detections(&output);
        assert_eq!(decoded.frame_index, 7);
        assert_eq!(decoded.detections.len(), 1);
        assert_eq!(decoded.discarded, 2);
    }

    #[test]
    fn best_index_prefers_lowest_index_on_ties() {
        assert_eq!(best_index(&[0.2, 0.9, 0.9, 0.1]), Some(1));
        assert_eq!(best_index(&[f32::NAN, 0.3]), Some(1));
        assert_eq!(best_index(&[]), None);
        assert_eq!(best_index(&[f32::NAN]), None);
    }
}
