//! Core engine: the fetch → reconcile → decide → execute scan.

pub mod scanner;
pub mod enricher;
pub mod executor;
pub mod accountant;
