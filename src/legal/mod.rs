//! Ontario estate-document domain: intake, drafting, generation,
//! statutory compliance, risk scoring, and practice bookkeeping.

pub mod billing;
pub mod compliance;
pub mod docgen;
pub mod drafting;
pub mod intake;
pub mod lso;
pub mod risk;
pub mod trust;
