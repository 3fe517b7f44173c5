//! Segment formatting: decoded speech segments to display records and SRT text.

use serde::Serialize;

use crate::backend::TranscriptSegment;

/// JSON-facing view of one formatted segment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SegmentView {
    /// 1-based ordinal in decode order.
    pub id: usize,
    /// Rendered start timestamp, e.g. `0:00:05,000`.
    pub start: String,
    /// Rendered end timestamp.
    pub end: String,
    /// Transcript text with surrounding whitespace trimmed.
    pub text: String,
}

/// Formats one decoded segment into its display record.
pub fn segment_view(ordinal: usize, segment: &TranscriptSegment) -> SegmentView {
    SegmentView {
        id: ordinal,
        start: srt_timestamp(segment.start_secs),
        end: srt_timestamp(segment.end_secs),
        text: segment.text.trim().to_string(),
    }
}

/// Renders one SRT block from a formatted segment.
pub fn subtitle_block(view: &SegmentView) -> String {
    format!("{}\n{} --> {}\n{}\n\n", view.id, view.start, view.end, view.text)
}

/// Builds the display list and the full subtitle document for one upload.
///
/// Ordinals are assigned contiguously from 1 in decode order. The document is
/// the exact concatenation of the per-segment blocks, so a download
/// round-trips byte-for-byte against what the display list describes.
pub fn build_subtitle_document(segments: &[TranscriptSegment]) -> (Vec<SegmentView>, String) {
    let mut views = Vec::with_capacity(segments.len());
    let mut document = String::new();
    for (idx, segment) in segments.iter().enumerate() {
        let view = segment_view(idx + 1, segment);
        document.push_str(&subtitle_block(&view));
        views.push(view);
    }
    (views, document)
}

/// Renders a second offset as `H:MM:SS,000`.
///
/// The offset is truncated to whole seconds, not rounded; the millisecond
/// field is the literal `000`, matching the upstream tool's output.
pub fn srt_timestamp(seconds: f64) -> String {
    let total = if seconds <= 0.0 { 0 } else { seconds as u64 };
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{h}:{m:02}:{s:02},000")
}
