#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]

/// A single scope acquisition: voltage samples on a linear time axis starting at `t0` with one
/// sample every `dt` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub t0: f64,
    pub dt: f64,
    pub volts: Vec<f64>,
}

impl Trace {
    #[must_use]
    pub fn new(t0: f64, dt: f64, volts: Vec<f64>) -> Self {
        Trace { t0, dt, volts }
    }

    /// Trace with a unit time axis, for data that did not come off a scope.
    #[must_use]
    pub fn from_samples(volts: Vec<f64>) -> Self {
        Trace {
            t0: 0.0,
            dt: 1.0,
            volts,
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.volts.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volts.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn samples(&self) -> &[f64] {
        self.volts.as_slice()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<f64> {
        self.volts.get(idx).copied()
    }

    #[inline]
    #[must_use]
    pub fn time(&self, idx: usize) -> f64 {
        self.t0 + self.dt * idx as f64
    }

    pub fn time_axis(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.volts.len()).map(|i| self.time(i))
    }

    /// Largest sample, or `None` for an empty trace. NaNs are skipped.
    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.volts
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .reduce(f64::max)
    }
}

/// Transmission and reflection photodiode signals downloaded back to back from one trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceData {
    pub timestamp: Vec<f64>,
    pub transmission: Vec<f64>,
    pub reflection: Vec<f64>,
}

impl TraceData {
    #[must_use]
    pub fn new(transmission: Trace, reflection: Trace) -> Self {
        TraceData {
            timestamp: transmission.time_axis().collect(),
            transmission: transmission.volts,
            reflection: reflection.volts,
        }
    }

    #[must_use]
    pub fn transmission_trace(&self) -> Trace {
        let t0 = self.timestamp.first().copied().unwrap_or(0.0);
        let dt = match self.timestamp.as_slice() {
            [a, b, ..] => b - a,
            _ => 1.0,
        };
        Trace::new(t0, dt, self.transmission.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_axis_is_linear() {
        let tr = Trace::new(-1.0e-3, 2.0e-6, vec![0.0; 5]);
        let t: Vec<f64> = tr.time_axis().collect();
        assert_eq!(t.len(), 5);
        assert!((t[0] + 1.0e-3).abs() < 1e-15);
        assert!((t[4] - (-1.0e-3 + 8.0e-6)).abs() < 1e-15);
        assert!(t.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn max_skips_nan() {
        let tr = Trace::from_samples(vec![0.1, f64::NAN, 0.4, 0.2]);
        assert_eq!(tr.max(), Some(0.4));
        assert_eq!(Trace::from_samples(Vec::new()).max(), None);
    }

    #[test]
    fn trace_data_round_trips_time_axis() {
        let tx = Trace::new(0.5, 0.25, vec![1.0, 2.0, 3.0]);
        let rx = Trace::new(0.5, 0.25, vec![3.0, 2.0, 1.0]);
        let data = TraceData::new(tx.clone(), rx);
        assert_eq!(data.timestamp, vec![0.5, 0.75, 1.0]);
        assert_eq!(data.transmission_trace(), tx);
        assert_eq!(data.reflection, vec![3.0, 2.0, 1.0]);
    }
}
