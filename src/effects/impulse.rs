//! Synthetic reverb impulse responses.

use rand::Rng;

use crate::audio::ImpulseResponse;

/// `seconds` of stereo white noise shaped by `(1 - i/len)^decay`.
pub fn reverb_impulse<R: Rng + ?Sized>(
    sample_rate: f32,
    seconds: f64,
    decay: f64,
    rng: &mut R,
) -> ImpulseResponse {
    let len = (sample_rate as f64 * seconds).max(0.0) as usize;
    let mut channels = Vec::with_capacity(2);
    for _ in 0..2 {
        let data: Vec<f32> = (0..len)
            .map(|i| {
                let envelope = (1.0 - i as f64 / len as f64).powf(decay);
                (rng.gen_range(-1.0..1.0) * envelope) as f32
            })
            .collect();
        channels.push(data);
    }
    ImpulseResponse {
        sample_rate,
        channels,
    }
}
