//! Application services.

mod callback_queue;
mod maintenance_menu;

pub use callback_queue::{CallbackQueue, Job, MainQueue, MainQueueRunner};
pub use maintenance_menu::{
    MaintenanceAction, MaintenanceError, MaintenanceMenu, Reloadable, ScreenCapabilities,
};
