pub mod aggregate;
pub mod cache;
pub mod config;
pub mod db;
pub mod demo;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod intervals;
pub mod normalize;
pub mod report;
pub mod service;
pub mod store;
pub mod timeline;
pub mod uptime;

#[cfg(test)]
mod tests {
    use super::error::AppError;

    #[test]
    fn app_error_is_structured() {
        let err = AppError::new("DB_TEST", "db failed").with_retryable(true);
        assert_eq!(err.code, "DB_TEST");
        assert_eq!(err.message, "db failed");
        assert!(err.retryable);
        assert!(!err.is_not_found());
    }
}
