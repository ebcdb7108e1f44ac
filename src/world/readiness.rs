//! Load progress around a position

/// How many chunks around a point are displayed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Chunks inside the square, clipped to the world limit
    pub needed: usize,
    /// Of those, chunks with a visual attached
    pub ready: usize,
}

impl Readiness {
    pub fn is_complete(&self) -> bool {
        self.ready >= self.needed
    }

    /// Ready share in [0, 1]; an empty square counts as complete
    pub fn fraction(&self) -> f32 {
        if self.needed == 0 {
            1.0
        } else {
            self.ready as f32 / self.needed as f32
        }
    }
}
