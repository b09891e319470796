//! Metric names recorded by the import flows when the `metrics` feature is on.

pub use ::metrics::{counter, histogram};

pub mod names {
    /// Import attempts, labelled by `source` and `status`
    pub const IMPORTS_TOTAL: &str = "skillport_skill_imports_total";
    /// Import failures, labelled by `source` and `code`
    pub const IMPORT_ERRORS_TOTAL: &str = "skillport_skill_import_errors_total";
    /// Import duration in seconds, labelled by `source`
    pub const IMPORT_DURATION_SECONDS: &str = "skillport_skill_import_duration_seconds";
    /// Resource files written to the blob store
    pub const RESOURCES_STORED_TOTAL: &str = "skillport_skill_resources_stored_total";
}

pub mod labels {
    pub const SOURCE: &str = "source";
    pub const STATUS: &str = "status";
    pub const CODE: &str = "code";
}
