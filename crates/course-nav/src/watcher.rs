//! Debounced range-membership detector over a stream of scalar samples.
//!
//! The watcher is a pure state machine: it owns no timers and performs no I/O,
//! so every transition is reproducible from the sequence of samples fed in.
//! The state is the outcome of the last evaluated sample; moving the bounds
//! does not change it, the next evaluation does.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeState {
    Unknown,
    InRange,
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Debounce window still open, or steady outside the range.
    None,
    /// `from_below` is true when the previous value was below `range_min`.
    Entered { value: f64, from_below: bool },
    /// `value` is `None` for a non-numeric sample. `below` is true when the
    /// new value is below `range_min`.
    Exited { value: Option<f64>, below: bool },
    Steady(f64),
}

#[derive(Debug, Clone)]
pub struct RangeWatcher {
    range_min: f64,
    range_max: f64,
    sample_size: usize,
    sample_count: usize,
    last: Option<f64>,
    state: RangeState,
}

impl Default for RangeWatcher {
    fn default() -> Self {
        Self {
            range_min: 0.0,
            range_max: 100.0,
            sample_size: 1,
            sample_count: 0,
            last: None,
            state: RangeState::Unknown,
        }
    }
}

impl RangeWatcher {
    pub fn new(range_min: f64, range_max: f64, sample_size: usize) -> Self {
        let mut w = Self::default();
        w.set_range(range_min, range_max);
        w.set_sample_size(sample_size);
        w
    }

    pub fn range(&self) -> (f64, f64) {
        (self.range_min, self.range_max)
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last
    }

    pub fn state(&self) -> RangeState {
        self.state
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.range_min && value <= self.range_max
    }

    /// Non-finite bounds are ignored, leaving that side unchanged.
    pub fn set_range(&mut self, min: f64, max: f64) {
        self.set_range_min(min);
        self.set_range_max(max);
    }

    pub fn set_range_min(&mut self, min: f64) {
        if min.is_finite() {
            self.range_min = min;
        }
    }

    pub fn set_range_max(&mut self, max: f64) {
        if max.is_finite() {
            self.range_max = max;
        }
    }

    /// Zero is ignored. The pending debounce count restarts either way.
    pub fn set_sample_size(&mut self, n: usize) {
        if n > 0 {
            self.sample_size = n;
        }
        self.sample_count = 0;
    }

    /// Forget the last observed value, as if no sample had been seen yet.
    pub fn reset(&mut self) {
        self.last = None;
        self.sample_count = 0;
        self.state = RangeState::Unknown;
    }

    /// Feed one sample. A non-finite sample is treated as leaving the range
    /// and skips the debounce window.
    pub fn observe(&mut self, value: f64) -> Transition {
        if !value.is_finite() {
            self.sample_count = 0;
            self.last = None;
            self.state = RangeState::Unknown;
            return Transition::Exited { value: None, below: false };
        }

        self.sample_count += 1;
        if self.sample_count < self.sample_size {
            return Transition::None;
        }
        self.sample_count = 0;

        let inside = self.contains(value);
        let t = match (inside, self.state) {
            (true, RangeState::InRange) => Transition::Steady(value),
            (true, _) => Transition::Entered {
                value,
                from_below: self.last.map_or(false, |prev| prev < self.range_min),
            },
            (false, RangeState::InRange) => Transition::Exited {
                value: Some(value),
                below: value < self.range_min,
            },
            (false, _) => Transition::None,
        };
        self.last = Some(value);
        self.state = if inside { RangeState::InRange } else { RangeState::OutOfRange };
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_outside_is_silent_then_enter_from_above() {
        let mut w = RangeWatcher::default();
        assert_eq!(w.observe(150.0), Transition::None);
        assert_eq!(w.observe(50.0), Transition::Entered { value: 50.0, from_below: false });
        assert_eq!(w.state(), RangeState::InRange);
    }

    #[test]
    fn first_sample_inside_enters() {
        let mut w = RangeWatcher::default();
        assert_eq!(w.observe(10.0), Transition::Entered { value: 10.0, from_below: false });
        assert_eq!(w.observe(20.0), Transition::Steady(20.0));
    }

    #[test]
    fn enter_from_below() {
        let mut w = RangeWatcher::new(10.0, 20.0, 1);
        assert_eq!(w.observe(5.0), Transition::None);
        assert_eq!(w.observe(15.0), Transition::Entered { value: 15.0, from_below: true });
    }

    #[test]
    fn exit_reports_side() {
        let mut w = RangeWatcher::new(10.0, 20.0, 1);
        w.observe(15.0);
        assert_eq!(w.observe(25.0), Transition::Exited { value: Some(25.0), below: false });
        w.observe(15.0);
        assert_eq!(w.observe(1.0), Transition::Exited { value: Some(1.0), below: true });
        assert_eq!(w.observe(0.5), Transition::None);
    }

    #[test]
    fn bounds_are_inclusive() {
        let mut w = RangeWatcher::new(0.0, 100.0, 1);
        assert!(matches!(w.observe(100.0), Transition::Entered { .. }));
        assert_eq!(w.observe(0.0), Transition::Steady(0.0));
    }

    #[test]
    fn debounce_evaluates_only_every_nth_sample() {
        let mut w = RangeWatcher::new(0.0, 100.0, 3);
        assert_eq!(w.observe(500.0), Transition::None);
        assert_eq!(w.observe(600.0), Transition::None);
        assert_eq!(w.last_value(), None);
        // third sample is the one evaluated
        assert_eq!(w.observe(42.0), Transition::Entered { value: 42.0, from_below: false });
        assert_eq!(w.observe(200.0), Transition::None);
        assert_eq!(w.observe(200.0), Transition::None);
        assert_eq!(w.observe(200.0), Transition::Exited { value: Some(200.0), below: false });
    }

    #[test]
    fn invalid_sample_exits_immediately_mid_window() {
        let mut w = RangeWatcher::new(0.0, 100.0, 3);
        w.observe(1.0);
        w.observe(1.0);
        w.observe(1.0);
        assert_eq!(w.state(), RangeState::InRange);
        w.observe(2.0);
        assert_eq!(w.observe(f64::NAN), Transition::Exited { value: None, below: false });
        assert_eq!(w.state(), RangeState::Unknown);
        // window restarted by the invalid sample
        assert_eq!(w.observe(3.0), Transition::None);
    }

    #[test]
    fn sample_size_change_resets_count_and_ignores_zero() {
        let mut w = RangeWatcher::new(0.0, 100.0, 2);
        assert_eq!(w.observe(1.0), Transition::None);
        w.set_sample_size(0);
        assert_eq!(w.sample_size(), 2);
        assert_eq!(w.observe(1.0), Transition::None);
        assert!(matches!(w.observe(1.0), Transition::Entered { .. }));
    }

    #[test]
    fn non_finite_bounds_are_ignored() {
        let mut w = RangeWatcher::default();
        w.set_range(f64::NAN, 50.0);
        assert_eq!(w.range(), (0.0, 50.0));
        w.set_range_max(f64::INFINITY);
        assert_eq!(w.range(), (0.0, 50.0));
    }

    #[test]
    fn shrinking_range_exits_on_next_evaluation() {
        let mut w = RangeWatcher::default();
        assert!(matches!(w.observe(80.0), Transition::Entered { .. }));
        w.set_range_max(50.0);
        assert_eq!(w.state(), RangeState::InRange);
        assert_eq!(w.observe(80.0), Transition::Exited { value: Some(80.0), below: false });
        assert_eq!(w.state(), RangeState::OutOfRange);
        assert_eq!(w.observe(30.0), Transition::Entered { value: 30.0, from_below: false });
    }

    #[test]
    fn growing_range_enters_on_next_evaluation() {
        let mut w = RangeWatcher::default();
        assert_eq!(w.observe(150.0), Transition::None);
        w.set_range_max(200.0);
        assert_eq!(w.state(), RangeState::OutOfRange);
        assert_eq!(w.observe(150.0), Transition::Entered { value: 150.0, from_below: false });
    }
}
