//! Uniformly partitioned FFT convolution.
//!
//! The impulse response is cut into `BLOCK`-sample partitions, each held
//! as a spectrum. Input is collected one block at a time; when a block is
//! complete its spectrum is pushed onto a frequency-domain history and
//! multiplied against every partition (overlap-save). Output therefore
//! lags the input by exactly one block.

use microfft::Complex32;

use crate::audio::ImpulseResponse;

/// Partition length in samples, and the processing latency.
pub const BLOCK: usize = 128;
const FFT_SIZE: usize = 2 * BLOCK;

// Loudness calibration used by browser convolvers when normalising.
const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

type Spectrum = [Complex32; FFT_SIZE];

const ZERO: Complex32 = Complex32 { re: 0.0, im: 0.0 };

fn forward(time: &[f32; FFT_SIZE]) -> Spectrum {
    let mut buf = [ZERO; FFT_SIZE];
    for (bin, x) in buf.iter_mut().zip(time) {
        bin.re = *x;
    }
    *microfft::complex::cfft_256(&mut buf)
}

/// Real part of the inverse transform, via the conjugate trick.
fn inverse(spectrum: &Spectrum) -> [f32; FFT_SIZE] {
    let mut buf = [ZERO; FFT_SIZE];
    for (out, bin) in buf.iter_mut().zip(spectrum) {
        *out = bin.conj();
    }
    let transformed = microfft::complex::cfft_256(&mut buf);
    let scale = 1.0 / FFT_SIZE as f32;
    let mut time = [0.0; FFT_SIZE];
    for (t, bin) in time.iter_mut().zip(transformed.iter()) {
        *t = bin.re * scale;
    }
    time
}

/// Scale applied to an impulse response so that long noise tails do not
/// blow up the output level.
pub fn normalization_scale(impulse: &ImpulseResponse, sample_rate: f32) -> f32 {
    let len = impulse.len();
    let channels = impulse.channels.len();
    if len == 0 || channels == 0 {
        return 1.0;
    }
    let energy: f32 = impulse
        .channels
        .iter()
        .flat_map(|c| c.iter())
        .map(|x| x * x)
        .sum();
    let mut power = (energy / (channels * len) as f32).sqrt();
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }
    let mut scale = GAIN_CALIBRATION / power;
    if sample_rate > 0.0 {
        scale *= GAIN_CALIBRATION_SAMPLE_RATE / sample_rate;
    }
    scale
}

#[derive(Clone)]
struct Channel {
    partitions: Vec<Spectrum>,
    history: Vec<Spectrum>,
    head: usize,
    prev: [f32; BLOCK],
    current: [f32; BLOCK],
    output: [f32; BLOCK],
}

impl Channel {
    fn new(response: &[f32], scale: f32) -> Self {
        let partitions: Vec<Spectrum> = response
            .chunks(BLOCK)
            .map(|chunk| {
                let mut time = [0.0; FFT_SIZE];
                for (t, x) in time.iter_mut().zip(chunk) {
                    *t = x * scale;
                }
                forward(&time)
            })
            .collect();
        let history = vec![[ZERO; FFT_SIZE]; partitions.len()];
        Channel {
            partitions,
            history,
            head: 0,
            prev: [0.0; BLOCK],
            current: [0.0; BLOCK],
            output: [0.0; BLOCK],
        }
    }

    fn run_block(&mut self) {
        let count = self.partitions.len();
        if count == 0 {
            return;
        }
        let mut time = [0.0; FFT_SIZE];
        time[..BLOCK].copy_from_slice(&self.prev);
        time[BLOCK..].copy_from_slice(&self.current);

        self.head = (self.head + count - 1) % count;
        self.history[self.head] = forward(&time);

        let mut acc = [ZERO; FFT_SIZE];
        for (p, h) in self.partitions.iter().enumerate() {
            let x = &self.history[(self.head + p) % count];
            for k in 0..FFT_SIZE {
                acc[k] += x[k] * h[k];
            }
        }
        let y = inverse(&acc);
        self.output.copy_from_slice(&y[BLOCK..]);
        self.prev = self.current;
    }

    fn go_quiet(&mut self) {
        self.output = [0.0; BLOCK];
        self.prev = self.current;
    }
}

/// Stereo convolver node state.
#[derive(Clone)]
pub struct Convolver {
    channels: [Channel; 2],
    pos: usize,
    block_has_signal: bool,
    silent_blocks: usize,
}

impl Convolver {
    /// Build from `impulse`. A mono response is used for both channels.
    pub fn new(impulse: &ImpulseResponse, sample_rate: f32, normalize: bool) -> Self {
        let scale = if normalize {
            normalization_scale(impulse, sample_rate)
        } else {
            1.0
        };
        let empty: &[f32] = &[];
        let left = impulse.channels.first().map_or(empty, Vec::as_slice);
        let right = impulse.channels.get(1).map_or(left, Vec::as_slice);
        Convolver {
            channels: [Channel::new(left, scale), Channel::new(right, scale)],
            pos: 0,
            block_has_signal: false,
            silent_blocks: 0,
        }
    }

    pub fn process(&mut self, input: [f32; 2]) -> [f32; 2] {
        let out = [
            self.channels[0].output[self.pos],
            self.channels[1].output[self.pos],
        ];
        for (channel, x) in self.channels.iter_mut().zip(input) {
            channel.current[self.pos] = x;
        }
        if input != [0.0, 0.0] {
            self.block_has_signal = true;
        }
        self.pos += 1;
        if self.pos == BLOCK {
            self.pos = 0;
            self.end_block();
        }
        out
    }

    fn end_block(&mut self) {
        if self.block_has_signal {
            self.silent_blocks = 0;
        } else {
            self.silent_blocks += 1;
        }
        self.block_has_signal = false;

        // once the whole history is silent there is nothing left to ring
        let tail = self.channels[0].partitions.len().max(self.channels[1].partitions.len()) + 1;
        let idle = self.silent_blocks > tail;
        for channel in &mut self.channels {
            if idle {
                channel.go_quiet();
            } else {
                channel.run_block();
            }
        }
    }
}

impl std::fmt::Debug for Convolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Convolver")
            .field("partitions", &self.channels[0].partitions.len())
            .field("silent_blocks", &self.silent_blocks)
            .finish()
    }
}
