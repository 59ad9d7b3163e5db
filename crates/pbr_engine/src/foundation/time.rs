//! Frame clock and FPS counter

use std::time::{Duration, Instant};

/// Wall-clock time between successive frames
#[derive(Debug, Clone)]
pub struct Timer {
    started: Instant,
    last_tick: Instant,
    delta: Duration,
    frames: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Start the clock now
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_tick: now,
            delta: Duration::ZERO,
            frames: 0,
        }
    }

    /// Mark the start of a frame and return the time since the previous mark
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        self.delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        self.delta
    }

    /// Last frame duration in seconds
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Seconds since the timer started
    pub fn total_seconds(&self) -> f32 {
        self.started.elapsed().as_secs_f32()
    }

    /// Ticks so far
    pub fn frame_count(&self) -> u64 {
        self.frames
    }
}

/// Counts frames and reports the rate once per interval
///
/// Driven with explicit elapsed durations so the frame driver decides the clock.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    interval: Duration,
    elapsed: Duration,
    frames: u32,
}

impl FpsCounter {
    /// Create a counter that reports every `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed: Duration::ZERO,
            frames: 0,
        }
    }

    /// Record one frame that took `frame_time`
    ///
    /// Returns the frame count of the finished interval when one elapses.
    pub fn tick(&mut self, frame_time: Duration) -> Option<u32> {
        self.frames += 1;
        self.elapsed += frame_time;
        if self.elapsed < self.interval {
            return None;
        }

        let frames = self.frames;
        self.elapsed -= self.interval;
        self.frames = 0;
        Some(frames)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_counter_reports_once_per_interval() {
        let mut counter = FpsCounter::new(Duration::from_secs(1));
        let frame = Duration::from_millis(250);

        assert_eq!(counter.tick(frame), None);
        assert_eq!(counter.tick(frame), None);
        assert_eq!(counter.tick(frame), None);
        assert_eq!(counter.tick(frame), Some(4));
        assert_eq!(counter.tick(frame), None);
    }

    #[test]
    fn test_fps_counter_carries_remainder() {
        let mut counter = FpsCounter::new(Duration::from_secs(1));

        assert_eq!(counter.tick(Duration::from_millis(1500)), Some(1));
        // 500ms carried over from the previous interval
        assert_eq!(counter.tick(Duration::from_millis(500)), Some(1));
    }

    #[test]
    fn test_timer_counts_frames() {
        let mut timer = Timer::new();
        timer.tick();
        let delta = timer.tick();

        assert_eq!(timer.frame_count(), 2);
        assert!(timer.total_seconds() >= delta.as_secs_f32());
    }
}
