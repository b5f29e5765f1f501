//! Per-screen cache maintenance actions.
//!
//! Screens register what they can do up front; the menu never probes a
//! screen's type at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::use_cases::CacheAdminUseCase;
use crate::domain::errors::CacheError;

bitflags! {
    /// Optional abilities of a registered screen.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScreenCapabilities: u8 {
        /// The screen can re-request everything it shows.
        const RELOAD = 1 << 0;
    }
}

/// A screen whose content can be requested again.
pub trait Reloadable: Send + Sync {
    /// Re-requests every visible image.
    fn reload(&self);
}

/// One entry of the maintenance menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceAction {
    /// Clear memory and disk caches.
    CleanCache,
    /// Close the menu.
    Dismiss,
    /// Reload the screen.
    Reload,
}

impl MaintenanceAction {
    /// Menu label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CleanCache => "Clean Cache",
            Self::Dismiss => "Cancel",
            Self::Reload => "Reload",
        }
    }
}

/// Errors raised by [`MaintenanceMenu::perform`].
#[derive(Debug, Error)]
pub enum MaintenanceError {
    /// No screen registered under this name.
    #[error("unknown screen: {0}")]
    UnknownScreen(String),
    /// The screen did not register the capability the action needs.
    #[error("screen {screen} does not support {action:?}")]
    Unsupported {
        /// Screen name.
        screen: String,
        /// Requested action.
        action: MaintenanceAction,
    },
    /// Clearing the cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

struct Screen {
    reloadable: Option<Arc<dyn Reloadable>>,
}

impl Screen {
    fn capabilities(&self) -> ScreenCapabilities {
        if self.reloadable.is_some() {
            ScreenCapabilities::RELOAD
        } else {
            ScreenCapabilities::empty()
        }
    }
}

/// Builds and performs maintenance actions for registered screens.
pub struct MaintenanceMenu {
    admin: CacheAdminUseCase,
    screens: HashMap<String, Screen>,
}

impl MaintenanceMenu {
    /// Creates an empty menu.
    #[must_use]
    pub fn new(admin: CacheAdminUseCase) -> Self {
        Self {
            admin,
            screens: HashMap::new(),
        }
    }

    /// Registers a screen that can only clean the cache.
    pub fn register(&mut self, name: impl Into<String>) {
        let name = name.into();
        debug!(screen = %name, "Registered screen");
        self.screens.insert(name, Screen { reloadable: None });
    }

    /// Registers a screen that can also reload.
    pub fn register_reloadable(&mut self, name: impl Into<String>, screen: Arc<dyn Reloadable>) {
        let name = name.into();
        debug!(screen = %name, "Registered reloadable screen");
        self.screens.insert(
            name,
            Screen {
                reloadable: Some(screen),
            },
        );
    }

    /// Capabilities registered for `name`.
    #[must_use]
    pub fn capabilities(&self, name: &str) -> Option<ScreenCapabilities> {
        self.screens.get(name).map(Screen::capabilities)
    }

    /// Actions offered on `name`, in menu order. Empty for unknown screens.
    #[must_use]
    pub fn actions(&self, name: &str) -> Vec<MaintenanceAction> {
        let Some(capabilities) = self.capabilities(name) else {
            return Vec::new();
        };
        let mut actions = vec![MaintenanceAction::CleanCache, MaintenanceAction::Dismiss];
        if capabilities.contains(ScreenCapabilities::RELOAD) {
            actions.push(MaintenanceAction::Reload);
        }
        actions
    }

    /// Performs `action` for the screen `name`.
    ///
    /// # Errors
    /// Returns error for unknown screens, unsupported actions, or when the
    /// disk cache cannot be cleared.
    pub async fn perform(&self, name: &str, action: MaintenanceAction) -> Result<(), MaintenanceError> {
        let screen = self
            .screens
            .get(name)
            .ok_or_else(|| MaintenanceError::UnknownScreen(name.to_string()))?;

        match action {
            MaintenanceAction::CleanCache => {
                self.admin.clean_cache().await?;
                info!(screen = %name, "Cache cleaned");
            }
            MaintenanceAction::Dismiss => {}
            MaintenanceAction::Reload => {
                let reloadable =
                    screen
                        .reloadable
                        .as_ref()
                        .ok_or_else(|| MaintenanceError::Unsupported {
                            screen: name.to_string(),
                            action,
                        })?;
                reloadable.reload();
                debug!(screen = %name, "Screen reloaded");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{CacheKey, DecodedImage};
    use crate::domain::ports::ImageCachePort;
    use crate::infrastructure::image::MemoryCacheConfig;
    use crate::test_support::test_cache;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::runtime::Handle;

    #[derive(Default)]
    struct CountingScreen {
        reloads: AtomicUsize,
    }

    impl Reloadable for CountingScreen {
        fn reload(&self) {
            self.reloads.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn test_actions_follow_registration() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        let mut menu = MaintenanceMenu::new(CacheAdminUseCase::new(cache, Handle::current()));
        menu.register("detail");
        menu.register_reloadable("grid", Arc::new(CountingScreen::default()));

        assert_eq!(
            menu.actions("detail"),
            vec![MaintenanceAction::CleanCache, MaintenanceAction::Dismiss]
        );
        assert_eq!(menu.actions("grid").last(), Some(&MaintenanceAction::Reload));
        assert!(menu.actions("missing").is_empty());
        assert_eq!(menu.capabilities("grid"), Some(ScreenCapabilities::RELOAD));
    }

    #[tokio::test]
    async fn test_perform_reload_and_unsupported() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        let mut menu = MaintenanceMenu::new(CacheAdminUseCase::new(cache, Handle::current()));
        let grid = Arc::new(CountingScreen::default());
        menu.register("detail");
        menu.register_reloadable("grid", grid.clone());

        menu.perform("grid", MaintenanceAction::Reload).await.unwrap();
        assert_eq!(grid.reloads.load(Ordering::Relaxed), 1);

        assert!(matches!(
            menu.perform("detail", MaintenanceAction::Reload).await,
            Err(MaintenanceError::Unsupported { .. })
        ));
        assert!(matches!(
            menu.perform("missing", MaintenanceAction::CleanCache).await,
            Err(MaintenanceError::UnknownScreen(_))
        ));
    }

    #[tokio::test]
    async fn test_clean_cache_action_clears_memory() {
        let (cache, _dir) = test_cache(MemoryCacheConfig::default()).await;
        let mut menu =
            MaintenanceMenu::new(CacheAdminUseCase::new(cache.clone(), Handle::current()));
        menu.register("detail");
        cache.memory().put(
            CacheKey::from_parts("a", ""),
            Arc::new(DecodedImage::still(image::DynamicImage::new_rgba8(1, 1))),
        );

        menu.perform("detail", MaintenanceAction::CleanCache)
            .await
            .unwrap();
        assert!(cache.memory().is_empty());
    }
}
