//! Status indicator: maps system conditions onto LED patterns.
//!
//! | Condition       | Pattern                           |
//! |-----------------|-----------------------------------|
//! | `Connecting`    | short-short-pause, repeating      |
//! | `JustConnected` | 3 blinks then solid for 3 s       |
//! | `DataSent`      | one quick blink                   |
//! | `Fault`         | fast continuous blinking          |
//! | `Idle`          | off                               |
//!
//! The controller calls [`show`](StatusIndicator::show) on edges and
//! [`tick`](StatusIndicator::tick) from every wait slice. One-shot
//! patterns fall back to `Idle` once they have played.
//!
//! A one-shot request never cuts off a higher-priority one-shot that is
//! still playing: the data-sent blink right after a connect is skipped
//! so the full connected pattern is seen. Priority runs
//! `Fault` > `JustConnected` = `Connecting` > `DataSent` > `Idle`.

use embedded_hal::digital::OutputPin;

use crate::drivers::led_patterns::{LedPatternEngine, PatternId};
use crate::drivers::status_led::StatusLed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Connecting,
    JustConnected,
    DataSent,
    Fault,
    Idle,
}

impl Condition {
    pub const fn priority(self) -> u8 {
        match self {
            Self::Fault => 3,
            Self::JustConnected | Self::Connecting => 2,
            Self::DataSent => 1,
            Self::Idle => 0,
        }
    }

    pub const fn pattern(self) -> PatternId {
        match self {
            Self::Connecting => PatternId::ShortShortPause,
            Self::JustConnected => PatternId::TripleThenSolid,
            Self::DataSent => PatternId::SingleBlink,
            Self::Fault => PatternId::FastBlink,
            Self::Idle => PatternId::Off,
        }
    }
}

pub struct StatusIndicator<P> {
    led: StatusLed<P>,
    engine: LedPatternEngine,
    condition: Condition,
}

impl<P: OutputPin> StatusIndicator<P> {
    pub fn new(pin: P) -> Self {
        Self {
            led: StatusLed::new(pin),
            engine: LedPatternEngine::new(),
            condition: Condition::Idle,
        }
    }

    /// Start the pattern for `condition`, interrupting the current one
    /// unless a higher-priority one-shot is still playing.
    pub fn show(&mut self, condition: Condition, now_ms: u64) {
        let one_shot = condition.pattern().duration_ms().is_some();
        if one_shot
            && condition.priority() < self.condition.priority()
            && self.playing_one_shot(now_ms)
        {
            return;
        }
        self.condition = condition;
        self.engine.start(condition.pattern(), now_ms);
        self.led.set(self.engine.level(now_ms));
    }

    /// Advance playback and drive the pin.
    pub fn tick(&mut self, now_ms: u64) {
        if self.engine.is_finished(now_ms) {
            self.condition = Condition::Idle;
            self.engine.start(PatternId::Off, now_ms);
        }
        let level = self.engine.level(now_ms);
        if level != self.led.is_lit() {
            self.led.set(level);
        }
    }

    fn playing_one_shot(&self, now_ms: u64) -> bool {
        self.engine.pattern().duration_ms().is_some() && !self.engine.is_finished(now_ms)
    }

    pub fn current(&self) -> Condition {
        self.condition
    }

    pub fn is_lit(&self) -> bool {
        self.led.is_lit()
    }
}
