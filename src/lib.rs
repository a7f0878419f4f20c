pub mod algorithm;
pub mod chemistry;
pub mod data;
pub mod error;

pub use {
    chemistry::compound::parse_formula,
    chemistry::compound::CompoundSide,
    chemistry::compound::LabeledCompound,
    chemistry::compound::TracerSpec,

    chemistry::elements::Element,
    chemistry::elements::Isotope,
    chemistry::elements::IsotopeTable,

    data::measurement::MeasuredEntry,
    data::measurement::MeasurementVector,
    data::purity::TracerPurity,

    algorithm::combination::Combination,
    algorithm::combination::CombinationSet,
    algorithm::combination::Slot,
    algorithm::combination::SlotKind,

    algorithm::correction::correct,
    algorithm::correction::correct_all,
    algorithm::correction::correct_batch,
    algorithm::correction::CorrectionEngine,
    algorithm::correction::CorrectionOptions,
    algorithm::correction::CorrectionResult,

    error::CorrectionError,
};
