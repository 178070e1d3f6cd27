//! Parameter automation timelines.

/// A single automation point.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Point {
    /// Jump to `value` at `time`.
    Set { time: f64, value: f32 },
    /// Arrive at `value` at `time`, linearly from the previous point.
    Ramp { time: f64, value: f32 },
}

impl Point {
    fn time(&self) -> f64 {
        match *self {
            Point::Set { time, .. } | Point::Ramp { time, .. } => time,
        }
    }

    fn value(&self) -> f32 {
        match *self {
            Point::Set { value, .. } | Point::Ramp { value, .. } => value,
        }
    }
}

/// Value of one parameter over time, Web Audio style.
#[derive(Debug, Clone)]
pub struct ParamTimeline {
    initial: f32,
    points: Vec<Point>,
}

impl ParamTimeline {
    pub fn new(initial: f32) -> Self {
        ParamTimeline {
            initial,
            points: Vec::new(),
        }
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(Point::Set { time, value });
    }

    /// Ramp to `value` at `time`. `now` anchors the ramp when no earlier
    /// point exists, so it starts from the value held right now.
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64, now: f64) {
        if !self.points.iter().any(|p| p.time() <= time) {
            let held = self.value_at(now);
            self.insert(Point::Set {
                time: now.min(time),
                value: held,
            });
        }
        self.insert(Point::Ramp { time, value });
    }

    /// Remove every point at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.points.retain(|p| p.time() < time);
    }

    pub fn value_at(&self, t: f64) -> f32 {
        // index of the first point strictly after t
        let next = self.points.partition_point(|p| p.time() <= t);
        let (start_time, start_value) = match next.checked_sub(1) {
            Some(i) => (self.points[i].time(), self.points[i].value()),
            None => (f64::NEG_INFINITY, self.initial),
        };
        match self.points.get(next) {
            Some(Point::Ramp { time, value }) if start_time.is_finite() => {
                let span = time - start_time;
                if span <= 0.0 {
                    return *value;
                }
                let frac = ((t - start_time) / span) as f32;
                start_value + (value - start_value) * frac
            }
            _ => start_value,
        }
    }

    /// Forget points that can no longer affect values at or after `t`.
    pub fn prune_before(&mut self, t: f64) {
        let next = self.points.partition_point(|p| p.time() <= t);
        if next >= 2 {
            let held = self.points[next - 1];
            self.initial = held.value();
            self.points.drain(..next - 1);
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    fn insert(&mut self, point: Point) {
        // equal times keep insertion order
        let at = self.points.partition_point(|p| p.time() <= point.time());
        self.points.insert(at, point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_initial_without_points() {
        let p = ParamTimeline::new(0.7);
        assert_eq!(p.value_at(0.0), 0.7);
        assert_eq!(p.value_at(10.0), 0.7);
    }

    #[test]
    fn set_value_takes_effect_at_time() {
        let mut p = ParamTimeline::new(1.0);
        p.set_value_at_time(0.25, 1.0);
        assert_eq!(p.value_at(0.5), 1.0);
        assert_eq!(p.value_at(1.0), 0.25);
        assert_eq!(p.value_at(2.0), 0.25);
    }

    #[test]
    fn linear_ramp_interpolates() {
        let mut p = ParamTimeline::new(0.0);
        p.set_value_at_time(0.0, 1.0);
        p.linear_ramp_to_value_at_time(1.0, 2.0, 0.0);
        assert!((p.value_at(1.5) - 0.5).abs() < 1e-6);
        assert_eq!(p.value_at(2.0), 1.0);
        assert_eq!(p.value_at(3.0), 1.0);
    }

    #[test]
    fn ramp_without_anchor_starts_from_now() {
        let mut p = ParamTimeline::new(0.8);
        p.linear_ramp_to_value_at_time(0.0, 1.0, 0.5);
        assert_eq!(p.value_at(0.5), 0.8);
        assert!((p.value_at(0.75) - 0.4).abs() < 1e-6);
        assert_eq!(p.value_at(1.0), 0.0);
    }

    #[test]
    fn cancel_drops_future_points() {
        let mut p = ParamTimeline::new(0.0);
        p.set_value_at_time(1.0, 0.0);
        p.linear_ramp_to_value_at_time(1.0, 1.0, 0.0);
        p.linear_ramp_to_value_at_time(0.0, 2.0, 0.0);
        p.cancel_scheduled_values(0.5);
        assert_eq!(p.len(), 1);
        assert_eq!(p.value_at(1.5), 1.0);
    }

    #[test]
    fn prune_keeps_current_value() {
        let mut p = ParamTimeline::new(0.0);
        p.set_value_at_time(0.2, 0.0);
        p.set_value_at_time(0.4, 1.0);
        p.linear_ramp_to_value_at_time(0.8, 3.0, 1.0);
        let before = p.value_at(2.0);
        p.prune_before(2.0);
        assert_eq!(p.value_at(2.0), before);
        assert_eq!(p.len(), 2);
    }
}
