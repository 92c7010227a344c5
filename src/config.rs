use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

/// Application-level constants
pub const APP_NAME: &str = "Carefile";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the application data directory
/// ~/Carefile/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Carefile")
}

/// Path of the clinic database file
pub fn database_path() -> PathBuf {
    app_data_dir().join("clinic.db")
}

/// Base directory for the filesystem-backed object store
pub fn attachments_dir() -> PathBuf {
    app_data_dir().join("attachments")
}

pub fn default_log_filter() -> String {
    "carefile_lib=info".into()
}

/// Initialize tracing for the hosting binary. `RUST_LOG` wins over the
/// default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_filter())),
        )
        .init();

    tracing::info!("{APP_NAME} core starting v{APP_VERSION}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with("Carefile"));
    }

    #[test]
    fn database_and_attachments_under_app_data() {
        let app = app_data_dir();
        assert!(database_path().starts_with(&app));
        assert!(attachments_dir().starts_with(&app));
    }
}
