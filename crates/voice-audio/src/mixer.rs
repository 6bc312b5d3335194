//! Segment timeline rendered against a sample-counting device clock.
//!
//! The mixer's cursor is the device clock: it advances by exactly the number of
//! frames rendered, so segment placement is sample-accurate and independent of
//! wall-clock timers.

use std::collections::VecDeque;

/// A mono segment placed at an absolute frame on the device clock.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledSegment {
    pub id: u64,
    pub start_frame: u64,
    pub samples: Vec<f32>,
}

impl ScheduledSegment {
    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

#[derive(Debug, Default)]
pub struct SegmentMixer {
    segments: VecDeque<ScheduledSegment>,
    cursor: u64,
}

impl SegmentMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rendered so far.
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Segments not yet fully rendered.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.segments.len()
    }

    /// Insert a segment, keeping the timeline ordered by start frame.
    ///
    /// Any part of the segment that lies before the cursor is skipped on render.
    pub fn schedule(&mut self, segment: ScheduledSegment) {
        if segment.start_frame < self.cursor {
            tracing::debug!(
                id = segment.id,
                start = segment.start_frame,
                cursor = self.cursor,
                "segment starts behind the device clock"
            );
        }
        let pos = self
            .segments
            .iter()
            .position(|s| s.start_frame > segment.start_frame)
            .unwrap_or(self.segments.len());
        self.segments.insert(pos, segment);
    }

    /// Drop segments that have not started sounding. Returns how many were dropped.
    pub fn cancel_pending(&mut self) -> usize {
        let before = self.segments.len();
        let cursor = self.cursor;
        self.segments.retain(|s| s.start_frame < cursor);
        before - self.segments.len()
    }

    /// Drop everything, including a segment that is mid-way through.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Render the next `out.len()` frames and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let begin = self.cursor;
        let end = begin + out.len() as u64;

        for seg in &self.segments {
            let seg_start = seg.start_frame;
            if seg_start >= end {
                break;
            }
            let seg_end = seg.end_frame();
            if seg_end <= begin {
                continue;
            }
            let from = seg_start.max(begin);
            let to = seg_end.min(end);
            let dst = &mut out[(from - begin) as usize..(to - begin) as usize];
            let src = &seg.samples[(from - seg_start) as usize..(to - seg_start) as usize];
            for (d, s) in dst.iter_mut().zip(src) {
                *d += *s;
            }
        }

        self.segments.retain(|s| s.end_frame() > end);
        self.cursor = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: u64, start: u64, samples: Vec<f32>) -> ScheduledSegment {
        ScheduledSegment {
            id,
            start_frame: start,
            samples,
        }
    }

    #[test]
    fn contiguous_segments_render_without_gap() {
        let mut mixer = SegmentMixer::new();
        mixer.schedule(seg(1, 0, vec![1.0; 3]));
        mixer.schedule(seg(2, 3, vec![2.0; 3]));

        let mut out = vec![9.0; 8];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 0.0, 0.0]);
        assert_eq!(mixer.position(), 8);
        assert_eq!(mixer.pending(), 0);
    }

    #[test]
    fn segments_span_render_calls() {
        let mut mixer = SegmentMixer::new();
        mixer.schedule(seg(1, 2, vec![0.5, 0.6, 0.7, 0.8]));

        let mut first = vec![0.0; 4];
        mixer.render(&mut first);
        assert_eq!(first, vec![0.0, 0.0, 0.5, 0.6]);
        assert_eq!(mixer.pending(), 1);

        let mut second = vec![0.0; 4];
        mixer.render(&mut second);
        assert_eq!(second, vec![0.7, 0.8, 0.0, 0.0]);
        assert_eq!(mixer.pending(), 0);
    }

    #[test]
    fn out_of_order_schedule_is_sorted() {
        let mut mixer = SegmentMixer::new();
        mixer.schedule(seg(2, 2, vec![2.0; 2]));
        mixer.schedule(seg(1, 0, vec![1.0; 2]));
        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn cancel_pending_keeps_sounding_segment() {
        let mut mixer = SegmentMixer::new();
        mixer.schedule(seg(1, 0, vec![1.0; 4]));
        mixer.schedule(seg(2, 4, vec![2.0; 4]));
        let mut out = vec![0.0; 2];
        mixer.render(&mut out);

        assert_eq!(mixer.cancel_pending(), 1);
        let mut tail = vec![0.0; 4];
        mixer.render(&mut tail);
        assert_eq!(tail, vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn late_segment_skips_past_part() {
        let mut mixer = SegmentMixer::new();
        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        mixer.schedule(seg(1, 2, vec![1.0, 2.0, 3.0, 4.0]));
        mixer.render(&mut out);
        assert_eq!(out, vec![3.0, 4.0, 0.0, 0.0]);
    }
}
