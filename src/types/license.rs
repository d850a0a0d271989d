use serde::{Deserialize, Serialize};
use std::fmt;

/// License class derived from the rating band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LicenseClass {
    Rookie,
    D,
    C,
    B,
    A,
}

impl LicenseClass {
    pub fn from_rating(rating: f64) -> Self {
        if rating >= 4.0 {
            LicenseClass::A
        } else if rating >= 3.0 {
            LicenseClass::B
        } else if rating >= 2.0 {
            LicenseClass::C
        } else if rating >= 1.0 {
            LicenseClass::D
        } else {
            LicenseClass::Rookie
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LicenseClass::A => "A",
            LicenseClass::B => "B",
            LicenseClass::C => "C",
            LicenseClass::D => "D",
            LicenseClass::Rookie => "Rookie",
        }
    }
}

impl fmt::Display for LicenseClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
