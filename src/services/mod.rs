//! Service layer for the measurement store.
//!
//! - Record store client (`MeasurementService`): CRUD over the
//!   `measurements` collection plus image upload/delete

mod measurements;

pub use measurements::{DeleteReport, MeasurementService};
