//! Stereo delay buffer. Feedback and mixing happen in the graph, so the
//! line itself only stores and recalls samples.

#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
}

impl DelayLine {
    /// A line able to hold `max_delay_seconds` of audio.
    pub fn new(sample_rate: f64, max_delay_seconds: f64) -> Self {
        let buffer_size = (sample_rate * max_delay_seconds.max(0.0)) as usize + 2;
        DelayLine {
            buffer_l: vec![0.0; buffer_size],
            buffer_r: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
        }
    }

    /// The sample written `delay_time` seconds ago. Delays shorter than
    /// one sample read the previous write.
    #[inline]
    pub fn read(&self, delay_time: f64) -> [f32; 2] {
        let buffer_len = self.buffer_l.len();
        let delay_samples = ((delay_time * self.sample_rate).round() as usize).clamp(1, buffer_len - 1);
        let read_pos = (self.write_pos + buffer_len - delay_samples) % buffer_len;
        [self.buffer_l[read_pos], self.buffer_r[read_pos]]
    }

    #[inline]
    pub fn write(&mut self, frame: [f32; 2]) {
        self.buffer_l[self.write_pos] = frame[0];
        self.buffer_r[self.write_pos] = frame[1];
        self.write_pos = (self.write_pos + 1) % self.buffer_l.len();
    }

    pub fn clear(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_comes_back_after_delay() {
        let sample_rate = 1000.0;
        let mut line = DelayLine::new(sample_rate, 1.0);
        line.write([1.0, -1.0]);
        for i in 1..10 {
            assert_eq!(line.read(0.01), [0.0, 0.0], "early output at sample {i}");
            line.write([0.0, 0.0]);
        }
        assert_eq!(line.read(0.01), [1.0, -1.0]);
    }

    #[test]
    fn delay_is_capped_by_buffer() {
        let mut line = DelayLine::new(100.0, 0.1);
        line.write([0.5, 0.5]);
        // asking for far more than the buffer holds must not panic
        let _ = line.read(60.0);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut line = DelayLine::new(100.0, 0.1);
        line.write([1.0, 1.0]);
        line.clear();
        assert_eq!(line.read(0.01), [0.0, 0.0]);
    }
}
