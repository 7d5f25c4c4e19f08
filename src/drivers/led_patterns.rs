//! Blink pattern engine for the single-colour status LED.
//!
//! Patterns are step tables of (level, duration) pairs. The engine is
//! driven by absolute time: the caller passes the current uptime to
//! [`LedPatternEngine::level`] and gets back whether the LED should be
//! lit. Starting a new pattern restarts playback from its first step.
//!
//! | Pattern           | Shape                                  | Playback |
//! |-------------------|----------------------------------------|----------|
//! | `ShortShortPause` | 200 on, 200 off, 200 on, 800 off       | loop     |
//! | `TripleThenSolid` | 3 × (200 on, 200 off), then 3000 on    | once     |
//! | `SingleBlink`     | 150 on                                 | once     |
//! | `FastBlink`       | 100 on, 100 off                        | loop     |
//! | `Off`             | dark                                   | n/a      |

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternId {
    Off,
    ShortShortPause,
    TripleThenSolid,
    SingleBlink,
    FastBlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Playback {
    Loop,
    Once,
}

/// (lit, duration_ms)
type Step = (bool, u32);

const SHORT_SHORT_PAUSE: &[Step] = &[(true, 200), (false, 200), (true, 200), (false, 800)];
const TRIPLE_THEN_SOLID: &[Step] = &[
    (true, 200),
    (false, 200),
    (true, 200),
    (false, 200),
    (true, 200),
    (false, 200),
    (true, 3_000),
];
const SINGLE_BLINK: &[Step] = &[(true, 150)];
const FAST_BLINK: &[Step] = &[(true, 100), (false, 100)];

impl PatternId {
    fn table(self) -> Option<(&'static [Step], Playback)> {
        match self {
            Self::Off => None,
            Self::ShortShortPause => Some((SHORT_SHORT_PAUSE, Playback::Loop)),
            Self::TripleThenSolid => Some((TRIPLE_THEN_SOLID, Playback::Once)),
            Self::SingleBlink => Some((SINGLE_BLINK, Playback::Once)),
            Self::FastBlink => Some((FAST_BLINK, Playback::Loop)),
        }
    }

    /// Total length of a one-shot pattern; `None` for endless ones.
    pub fn duration_ms(self) -> Option<u64> {
        match self.table() {
            Some((steps, Playback::Once)) => Some(total_ms(steps)),
            _ => None,
        }
    }
}

fn total_ms(steps: &[Step]) -> u64 {
    steps.iter().map(|&(_, ms)| u64::from(ms)).sum()
}

/// Plays one pattern at a time. Stack-allocated, no heap.
pub struct LedPatternEngine {
    pattern: PatternId,
    started_ms: u64,
}

impl Default for LedPatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LedPatternEngine {
    pub fn new() -> Self {
        Self {
            pattern: PatternId::Off,
            started_ms: 0,
        }
    }

    pub fn pattern(&self) -> PatternId {
        self.pattern
    }

    /// Start `pattern` at `now_ms`, interrupting whatever was playing.
    pub fn start(&mut self, pattern: PatternId, now_ms: u64) {
        self.pattern = pattern;
        self.started_ms = now_ms;
    }

    /// A one-shot pattern has played to the end.
    pub fn is_finished(&self, now_ms: u64) -> bool {
        self.pattern
            .duration_ms()
            .is_some_and(|d| now_ms.saturating_sub(self.started_ms) >= d)
    }

    /// LED level for `now_ms`.
    pub fn level(&self, now_ms: u64) -> bool {
        let (steps, playback) = match self.pattern.table() {
            Some(t) => t,
            None => return false,
        };
        let total = total_ms(steps);
        let elapsed = now_ms.saturating_sub(self.started_ms);
        let mut pos = match playback {
            Playback::Loop => elapsed % total,
            Playback::Once if elapsed >= total => return false,
            Playback::Once => elapsed,
        };
        for &(lit, ms) in steps {
            let ms = u64::from(ms);
            if pos < ms {
                return lit;
            }
            pos -= ms;
        }
        false
    }
}
