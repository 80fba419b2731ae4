//! Temperature unit helpers. Control math is Celsius; these serve presentation only.

/// Presentation unit for temperatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TempUnit {
    Celsius,
    #[default]
    Fahrenheit,
}

impl TempUnit {
    /// Render a Celsius value in this unit.
    pub fn from_celsius(self, c: f64) -> f64 {
        match self {
            TempUnit::Celsius => c,
            TempUnit::Fahrenheit => to_fahrenheit(c),
        }
    }

    /// Convert a temperature *difference* from Celsius to this unit.
    pub fn delta_from_celsius(self, dc: f64) -> f64 {
        match self {
            TempUnit::Celsius => dc,
            TempUnit::Fahrenheit => dc * 9.0 / 5.0,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TempUnit::Celsius => "C",
            TempUnit::Fahrenheit => "F",
        }
    }
}

#[inline]
pub fn to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

#[inline]
pub fn to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_points() {
        assert_eq!(to_fahrenheit(100.0), 212.0);
        assert_eq!(to_celsius(32.0), 0.0);
        assert!((to_fahrenheit(-40.0) - -40.0).abs() < 1e-12);
    }

    #[test]
    fn deltas_scale_without_offset() {
        assert!((TempUnit::Fahrenheit.delta_from_celsius(0.2778) - 0.5).abs() < 1e-3);
        assert_eq!(TempUnit::Celsius.delta_from_celsius(1.5), 1.5);
    }
}
