//! Use case implementations.

mod cache_admin_use_case;
mod set_image_use_case;

pub use cache_admin_use_case::{CacheAdminUseCase, CacheReport};
pub use set_image_use_case::SetImageUseCase;
