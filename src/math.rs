
//! Simple math utilities.

/// Round up or down in specific calculations.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RoundingMode {

    /// Round down.
    Down,

    /// Round up.
    Up,
}

impl RoundingMode {
    pub(crate) fn divide(self, dividend: usize, divisor: usize) -> usize {
        match self {
            RoundingMode::Up => (dividend + divisor - 1) / divisor, // only works for positive numbers
            RoundingMode::Down => dividend / divisor,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn divide(){
        assert_eq!(RoundingMode::Up.divide(10, 4), 3);
        assert_eq!(RoundingMode::Up.divide(12, 4), 3);
        assert_eq!(RoundingMode::Down.divide(10, 4), 2);
    }
}
