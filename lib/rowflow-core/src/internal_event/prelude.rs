/// Lifecycle phase in which an error was observed.
pub mod error_stage {
    pub const INITIALIZING: &str = "initializing";
    pub const PROCESSING: &str = "processing";
}

/// Coarse classification used as the `error_type` tag on error metrics.
pub mod error_type {
    pub const CONFIGURATION_FAILED: &str = "configuration_failed";
    pub const LAYOUT_MISMATCH: &str = "layout_mismatch";
    pub const PROCESSING_FAILED: &str = "processing_failed";
    pub const SUB_TRANSFORMATION_FAILED: &str = "sub_transformation_failed";
}
