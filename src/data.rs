pub mod measurement;
pub mod purity;
