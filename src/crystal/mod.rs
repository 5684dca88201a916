mod binning;
mod matching;
mod orientation;
mod symmetry;

pub use binning::EulerBinning;
pub use matching::{CrystallographyReport, MatchCrystallography};
pub use orientation::Orientation;
pub use symmetry::CrystalStructure;
