use chrono::{DateTime, Local};

/// One sweep step as read back from the SMU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub voltage: f64,
    pub current: f64,
}

impl Sample {
    pub fn new(voltage: f64, current: f64) -> Self {
        Self::at(Local::now(), voltage, current)
    }

    pub fn at(timestamp: DateTime<Local>, voltage: f64, current: f64) -> Self {
        Sample {
            timestamp,
            voltage,
            current,
        }
    }

    /// V / I in ohms
    pub fn resistance(&self) -> f64 {
        self.voltage / self.current
    }

    /// V * I in watts
    pub fn power(&self) -> f64 {
        self.voltage * self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_quantities() {
        let s = Sample::new(1.0, 0.002);
        assert!((s.resistance() - 500.0).abs() < 1e-9);
        assert!((s.power() - 0.002).abs() < 1e-15);
    }

    #[test]
    fn zero_current_gives_infinite_resistance() {
        let s = Sample::new(0.5, 0.0);
        assert!(s.resistance().is_infinite());
        assert_eq!(s.power(), 0.0);
    }
}
