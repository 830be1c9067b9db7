//! Import/export engines and the batch controller that drives them.

pub mod controller;
pub mod export;
pub mod import;

pub use controller::{
    ExportSession, ExportStepResponse, HeaderChoice, ImportSession, ImportStepResponse, NextStep,
    Stage,
};
pub use export::{ExportBatch, ExportEngine};
pub use import::{ImportBatch, ImportEngine};
