//! Live progress of a MEM run (feature `progress`).
//!
//! [`MemitProgress`] drives an `indicatif` bar whose message carries the
//! current χ², the duration of the last step and the mean step duration of
//! the run so far.
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

/// Step duration in the largest unit that keeps it above one.
fn step_duration(d: Duration) -> String {
    if d < Duration::from_millis(1) {
        format!("{}µs", d.as_micros())
    } else if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

pub(crate) struct MemitProgress {
    bar: ProgressBar,
    started: Instant,
    last_step: Instant,
    steps: u32,
}

impl MemitProgress {
    pub fn new(niter: usize) -> Self {
        let bar = ProgressBar::new(niter.max(1) as u64);
        let style = ProgressStyle::with_template(
            "{bar:40.cyan/blue} {pos}/{len} | ETA {eta_precise} | {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(200));
        let now = Instant::now();
        MemitProgress {
            bar,
            started: now,
            last_step: now,
            steps: 0,
        }
    }

    /// Durations of the step just finished and of the mean step so far.
    fn lap(&mut self) -> (Duration, Duration) {
        let now = Instant::now();
        let last = now.duration_since(self.last_step);
        self.last_step = now;
        self.steps += 1;
        (last, now.duration_since(self.started) / self.steps)
    }

    pub fn iteration(&mut self, chi2: f64) {
        let (last, mean) = self.lap();
        self.bar.set_message(format!(
            "chi**2 = {chi2:.4} | step {}, mean {}",
            step_duration(last),
            step_duration(mean)
        ));
        self.bar.inc(1);
    }

    pub fn finish(self) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
    }
}
