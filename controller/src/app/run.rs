//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::ControllerError;

/// Run the release controller until the shutdown signal fires
pub async fn run(
    version: String,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ControllerError> {
    info!("Initializing release controller {}...", version);

    let mut shutdown_manager = ShutdownManager::new(options.lifecycle.clone());

    let app_state = match init(&options, &mut shutdown_manager).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to start release controller: {}", e);
            shutdown_manager.shutdown().await?;
            return Err(e);
        }
    };

    if options.lifecycle.resume_on_startup {
        match app_state.controller.resume_persisted().await {
            Ok(0) => info!("No interrupted operations to resume"),
            Ok(count) => info!("Resumed {} interrupted operations", count),
            Err(e) => error!("Failed to resume interrupted operations: {}", e),
        }
    }

    info!("Release controller running");
    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_manager: &mut ShutdownManager,
) -> Result<Arc<AppState>, ControllerError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;
    Ok(app_state)
}

// ================================= SHUTDOWN ====================================== //

struct ShutdownManager {
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
}

impl ShutdownManager {
    pub fn new(lifecycle_options: LifecycleOptions) -> Self {
        Self {
            lifecycle_options,
            app_state: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), ControllerError> {
        if self.app_state.is_some() {
            return Err(ControllerError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ControllerError> {
        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ControllerError> {
        info!("Shutting down release controller...");

        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
