/// Re-chunks capture output into fixed-size uplink frames.
#[derive(Debug)]
pub struct UplinkFramer {
    frame_samples: usize,
    pending: Vec<f32>,
}

impl UplinkFramer {
    /// `frame_samples` of 0 is treated as 1.
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples * 2),
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Append samples and return every complete frame, oldest first.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_samples;
        if complete == 0 {
            return Vec::new();
        }
        let frames = self
            .pending
            .chunks_exact(self.frame_samples)
            .map(<[f32]>::to_vec)
            .collect();
        self.pending.drain(..complete * self.frame_samples);
        frames
    }

    /// Samples waiting for a full frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

impl Default for UplinkFramer {
    fn default() -> Self {
        Self::new(960)
    }
}
