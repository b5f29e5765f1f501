//! Application layer: the boundary the UI layer calls into.

/// Data transfer objects.
pub mod dto;
/// Callback delivery and maintenance services.
pub mod services;
/// Use case implementations.
pub mod use_cases;

pub use dto::ImageCallbacks;
pub use services::{CallbackQueue, MainQueue, MainQueueRunner, MaintenanceMenu};
pub use use_cases::{CacheAdminUseCase, SetImageUseCase};
