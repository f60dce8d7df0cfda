//! Troubleshooting helpers: status-code translation and kernel listing.

use tracing::error;

use ts_common::{ClDriver, ClStatus, ProgramHandle};

/// Translate a raw driver status code to its symbolic name.
pub fn error_str(code: i32) -> &'static str {
    ClStatus(code).as_str()
}

/// Log every kernel entry point compiled into `program` and return them.
///
/// Used on a failed kernel lookup. A program whose names cannot be queried
/// yields an empty list and an error log.
pub fn print_kernel_names(driver: &dyn ClDriver, program: ProgramHandle) -> Vec<String> {
    match driver.kernel_names(program) {
        Ok(names) => {
            for name in &names {
                error!(kernel = %name, "  candidate kernel");
            }
            names
        }
        Err(status) => {
            error!(error = error_str(status.code()), "Cannot list program kernels");
            Vec::new()
        }
    }
}
