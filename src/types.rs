//! Shared domain enums used across the signal pipeline

use serde::{Deserialize, Serialize};

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }

    /// +1.0 for long, -1.0 for short
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    /// Direction a trend continuation trade takes
    pub fn from_trend(trend: TrendDirection) -> Option<Self> {
        match trend {
            TrendDirection::Up => Some(Self::Long),
            TrendDirection::Down => Some(Self::Short),
            TrendDirection::Sideways => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "BUY"),
            Self::Short => write!(f, "SELL"),
        }
    }
}

/// Direction of a trend or swing structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

impl TrendDirection {
    pub fn is_directional(&self) -> bool {
        !matches!(self, Self::Sideways)
    }

    pub fn matches(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Self::Up, Direction::Long) | (Self::Down, Direction::Short)
        )
    }
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
            Self::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

/// Bar interval of the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
}

impl Timeframe {
    pub fn minutes(&self) -> u32 {
        match self {
            Self::M1 => 1,
            Self::M5 => 5,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::H1 => 60,
            Self::H4 => 240,
        }
    }

    /// Bars in a 24h calendar day
    pub fn bars_per_day(&self) -> usize {
        (1440 / self.minutes()) as usize
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::M15
    }
}

impl std::str::FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "M1" | "1M" => Ok(Self::M1),
            "M5" | "5M" => Ok(Self::M5),
            "M15" | "15M" => Ok(Self::M15),
            "M30" | "30M" => Ok(Self::M30),
            "H1" | "1H" => Ok(Self::H1),
            "H4" | "4H" => Ok(Self::H4),
            other => Err(format!("unknown timeframe: {}", other)),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::M1 => write!(f, "M1"),
            Self::M5 => write!(f, "M5"),
            Self::M15 => write!(f, "M15"),
            Self::M30 => write!(f, "M30"),
            Self::H1 => write!(f, "H1"),
            Self::H4 => write!(f, "H4"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parsing() {
        assert_eq!("m15".parse::<Timeframe>(), Ok(Timeframe::M15));
        assert_eq!("1H".parse::<Timeframe>(), Ok(Timeframe::H1));
        assert!("D1".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::M15.bars_per_day(), 96);
    }

    #[test]
    fn test_trend_matches_direction() {
        assert!(TrendDirection::Up.matches(Direction::Long));
        assert!(!TrendDirection::Up.matches(Direction::Short));
        assert!(!TrendDirection::Sideways.matches(Direction::Long));
        assert_eq!(Direction::from_trend(TrendDirection::Down), Some(Direction::Short));
    }
}
