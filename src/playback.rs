//! Playback state: where the transport is, which voices are in flight and
//! whether the host timer should be running.
//!
//! Fields are only ever changed by the scheduler's transitions; everything
//! else gets read access.

use std::collections::BTreeMap;

use crate::sequence::Step;
use crate::voice::Voice;

/// Transport of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Stopped,
    /// A start was requested while the context was suspended. The first
    /// tick that sees the context running begins playback.
    Resuming { looping: bool },
    Playing { looping: bool },
}

impl Transport {
    /// True from the start request until the transport stops.
    pub fn is_active(self) -> bool {
        !matches!(self, Transport::Stopped)
    }

    pub fn is_looping(self) -> bool {
        match self {
            Transport::Resuming { looping } | Transport::Playing { looping } => looping,
            Transport::Stopped => false,
        }
    }
}

/// Identifies a voice for the lifetime of its registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceHandle(u64);

/// Opaque token for the host's repeating timer. Present while the
/// scheduler wants to be ticked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickHandle(u64);

#[derive(Debug, Clone, Copy)]
pub struct TrackedVoice {
    pub voice: Voice,
    /// Sequence step that produced the voice; `None` for previews.
    pub step: Option<usize>,
    started: bool,
    ended: bool,
}

/// What one poll of the registry observed.
#[derive(Debug, Default)]
pub struct VoicePoll {
    pub started: Vec<(VoiceHandle, Option<usize>, f64)>,
    pub ended: Vec<(VoiceHandle, Option<usize>, f64)>,
    /// Entries past their grace period, already removed.
    pub expired: Vec<Voice>,
}

/// Short-lived record of the voices currently scheduled or sounding.
#[derive(Debug, Default)]
pub struct VoiceRegistry {
    next_id: u64,
    voices: BTreeMap<VoiceHandle, TrackedVoice>,
}

impl VoiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn get(&self, handle: VoiceHandle) -> Option<&TrackedVoice> {
        self.voices.get(&handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VoiceHandle, &TrackedVoice)> {
        self.voices.iter().map(|(h, v)| (*h, v))
    }

    pub(crate) fn insert(&mut self, voice: Voice, step: Option<usize>) -> VoiceHandle {
        let handle = VoiceHandle(self.next_id);
        self.next_id += 1;
        self.voices.insert(
            handle,
            TrackedVoice {
                voice,
                step,
                started: false,
                ended: false,
            },
        );
        handle
    }

    /// Mark start and end crossings at `now` and drop entries that ended
    /// more than `grace` seconds ago.
    pub(crate) fn poll(&mut self, now: f64, grace: f64) -> VoicePoll {
        let mut poll = VoicePoll::default();
        for (handle, tracked) in &mut self.voices {
            if !tracked.started && tracked.voice.start() <= now {
                tracked.started = true;
                poll.started.push((*handle, tracked.step, tracked.voice.start()));
            }
            if !tracked.ended && tracked.voice.end() <= now {
                tracked.ended = true;
                poll.ended.push((*handle, tracked.step, tracked.voice.end()));
            }
        }
        let expired: Vec<VoiceHandle> = self
            .voices
            .iter()
            .filter(|(_, v)| v.voice.end() + grace <= now)
            .map(|(h, _)| *h)
            .collect();
        for handle in expired {
            if let Some(tracked) = self.voices.remove(&handle) {
                poll.expired.push(tracked.voice);
            }
        }
        poll
    }

    pub(crate) fn drain(&mut self) -> Vec<TrackedVoice> {
        std::mem::take(&mut self.voices).into_values().collect()
    }
}

/// A preview parked until the context finishes resuming.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingPreview {
    pub step: Step,
    pub duration: f64,
}

#[derive(Debug, Default)]
pub struct PlaybackState {
    pub(crate) transport: Transport,
    pub(crate) current_step: usize,
    /// Audio-clock time of the next step onset.
    pub(crate) next_step_time: f64,
    /// Set once a one-shot pass has emitted its last step; the transport
    /// stops when the clock reaches it.
    pub(crate) end_time: Option<f64>,
    pub(crate) voices: VoiceRegistry,
    pub(crate) pending_previews: Vec<PendingPreview>,
    pub(crate) tick: Option<TickHandle>,
    next_tick_id: u64,
}

impl PlaybackState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_active()
    }

    pub fn is_looping(&self) -> bool {
        self.transport.is_looping()
    }

    /// Index of the next step to schedule.
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn next_step_time(&self) -> f64 {
        self.next_step_time
    }

    pub fn voices(&self) -> &VoiceRegistry {
        &self.voices
    }

    pub fn pending_previews(&self) -> &[PendingPreview] {
        &self.pending_previews
    }

    pub fn tick_handle(&self) -> Option<TickHandle> {
        self.tick
    }

    /// Issue a tick handle if none is held. Returns true when a new one
    /// was issued.
    pub(crate) fn arm_tick(&mut self) -> bool {
        if self.tick.is_some() {
            return false;
        }
        self.tick = Some(TickHandle(self.next_tick_id));
        self.next_tick_id += 1;
        true
    }

    /// Drop the tick handle. Returns true when one was held.
    pub(crate) fn cancel_tick(&mut self) -> bool {
        self.tick.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NodeId;
    use crate::config::EngineConfig;
    use crate::voice::Envelope;

    fn voice(start: f64, duration: f64) -> Voice {
        Voice {
            oscillator: NodeId(1),
            gain: NodeId(2),
            envelope: Envelope::new(&EngineConfig::default(), start, duration),
        }
    }

    #[test]
    fn poll_reports_each_crossing_once() {
        let mut registry = VoiceRegistry::new();
        let handle = registry.insert(voice(0.1, 0.5), Some(3));

        let poll = registry.poll(0.05, 0.2);
        assert!(poll.started.is_empty());

        let poll = registry.poll(0.2, 0.2);
        assert_eq!(poll.started, vec![(handle, Some(3), 0.1)]);
        assert!(poll.ended.is_empty());

        let poll = registry.poll(0.3, 0.2);
        assert!(poll.started.is_empty(), "start must not repeat");

        let poll = registry.poll(0.65, 0.2);
        assert_eq!(poll.ended.len(), 1);
        assert!(poll.expired.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn voices_expire_after_grace() {
        let mut registry = VoiceRegistry::new();
        registry.insert(voice(0.0, 0.5), None);
        let poll = registry.poll(0.8, 0.2);
        assert_eq!(poll.started.len(), 1);
        assert_eq!(poll.ended.len(), 1);
        assert_eq!(poll.expired.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn drain_empties_the_registry() {
        let mut registry = VoiceRegistry::new();
        registry.insert(voice(0.0, 0.5), Some(0));
        registry.insert(voice(0.5, 0.5), Some(1));
        assert_eq!(registry.drain().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn tick_handles_are_issued_once() {
        let mut state = PlaybackState::new();
        assert!(state.arm_tick());
        let first = state.tick_handle();
        assert!(!state.arm_tick());
        assert_eq!(state.tick_handle(), first);
        assert!(state.cancel_tick());
        assert!(!state.cancel_tick());
        assert!(state.arm_tick());
        assert_ne!(state.tick_handle(), first);
    }

    #[test]
    fn transport_flags() {
        assert!(!Transport::Stopped.is_active());
        assert!(Transport::Resuming { looping: true }.is_looping());
        assert!(Transport::Playing { looping: false }.is_active());
        assert!(!Transport::Playing { looping: false }.is_looping());
    }
}
