//! WAV renderer: plays a snapshot through the full engine on an
//! [`OfflineContext`] and encodes the result.

use crate::audio::OfflineContext;
use crate::config::EngineConfig;
use crate::effects::EffectType;
use crate::error::CoreError;
use crate::sequencer::Sequencer;
use crate::snapshot::PresetSnapshot;

/// Render `passes` runs through the sequence as 16-bit stereo WAV bytes.
pub fn render_wav(snapshot: &PresetSnapshot, sample_rate: u32, passes: u32) -> Result<Vec<u8>, CoreError> {
    let frames = render_frames(snapshot, sample_rate, passes, &EngineConfig::default())?;
    Ok(encode_wav(&to_pcm_i16(&frames), sample_rate, 2))
}

/// Render `passes` runs through the sequence, plus a tail long enough for
/// active effects to ring out.
///
/// The scheduler is ticked every `config.tick_interval` of rendered audio,
/// exactly as a host timer would drive it.
pub fn render_frames(
    snapshot: &PresetSnapshot,
    sample_rate: u32,
    passes: u32,
    config: &EngineConfig,
) -> Result<Vec<[f32; 2]>, CoreError> {
    let passes = passes.max(1);
    let sr = sample_rate as f64;
    let mut seq = Sequencer::new(OfflineContext::new(sample_rate as f32), config.clone())?;
    seq.load_snapshot(snapshot)?;

    let steps = seq.sequence().sequence_max() * passes as usize;
    let body = config.start_offset + seq.tempo().step_duration() * steps as f64;
    let effects_on = seq
        .effects()
        .slots()
        .iter()
        .any(|s| s.is_active() && s.effect_type() != EffectType::None);
    let tail = if effects_on {
        config.reverb_seconds.max(1.0)
    } else {
        config.stop_tail + config.release_max
    };
    let body_frames = (body * sr).ceil() as usize;
    let total = ((body + tail) * sr).ceil() as usize;
    let chunk = (config.tick_interval * sr).round().max(1.0) as usize;

    let looping = passes > 1;
    seq.play(looping)?;
    // A one-shot pass ends by itself; repeated passes loop and are cut at
    // the end of the last one.
    let mut stopped = !looping;
    let mut frames = Vec::with_capacity(total);
    while frames.len() < total {
        if !stopped && frames.len() >= body_frames {
            seq.stop();
            stopped = true;
        }
        seq.tick()?;
        let limit = if stopped { total } else { body_frames };
        let n = chunk.min(limit - frames.len());
        let block = seq.context_mut().render(n);
        if block.is_empty() {
            break;
        }
        frames.extend(block);
    }
    log::info!(
        "rendered {steps} steps ({:.2}s) at {sample_rate} Hz",
        frames.len() as f64 / sr
    );
    Ok(frames)
}

/// Interleave and quantise stereo frames.
pub fn to_pcm_i16(frames: &[[f32; 2]]) -> Vec<i16> {
    let mut pcm = Vec::with_capacity(frames.len() * 2);
    for frame in frames {
        for &s in frame {
            pcm.push((s as f64 * 32767.0).round().clamp(-32768.0, 32767.0) as i16);
        }
    }
    pcm
}

/// Encode interleaved i16 PCM samples to a WAV byte buffer.
pub fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::SlotId;

    fn short_snapshot() -> PresetSnapshot {
        PresetSnapshot {
            sequence_max: 2,
            bpm: 240,
            ..PresetSnapshot::default()
        }
    }

    #[test]
    fn wav_header_valid() {
        let wav = render_wav(&short_snapshot(), 8000, 1).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 8000);
        let ch = u16::from_le_bytes([wav[22], wav[23]]);
        assert_eq!(ch, 2);

        let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(wav.len(), 44 + data_size as usize);
    }

    #[test]
    fn length_covers_every_pass() {
        let config = EngineConfig::default();
        let one = render_frames(&short_snapshot(), 8000, 1, &config).unwrap();
        let three = render_frames(&short_snapshot(), 8000, 3, &config).unwrap();
        // Two quarter notes at 240 bpm per pass: two extra passes add 1s.
        let extra = three.len() as i64 - one.len() as i64;
        assert!((extra - 8000).abs() <= 1, "extra frames {extra}");
    }

    #[test]
    fn rendered_audio_is_not_silent() {
        let frames = render_frames(&short_snapshot(), 8000, 1, &EngineConfig::default()).unwrap();
        assert!(frames.iter().any(|f| f[0].abs() > 0.01));
    }

    #[test]
    fn active_effects_extend_the_tail() {
        let config = EngineConfig {
            reverb_seconds: 0.1,
            ..EngineConfig::default()
        };
        let dry = render_frames(&short_snapshot(), 8000, 1, &config).unwrap();
        let mut wet_snapshot = short_snapshot();
        wet_snapshot.fx_slots[SlotId::C.index()].is_active = true;
        let wet = render_frames(&wet_snapshot, 8000, 1, &config).unwrap();
        assert!(wet.len() > dry.len());
    }

    #[test]
    fn pcm_is_clamped() {
        assert_eq!(to_pcm_i16(&[[2.0, -2.0]]), vec![32767, -32768]);
        assert_eq!(to_pcm_i16(&[[0.0, 0.5]]), vec![0, 16384]);
    }
}
