//! Error handling utilities

use tracing::error;

use crate::error::{describe_error_code, ErrorCode, HarnessError};

/// Handle fatal errors and exit with appropriate status code
///
/// - For `HarnessError`: shows the user message always, the developer message in verbose mode
/// - For other errors: shows the error and, in verbose mode, its chain
pub fn handle_fatal_error(error: anyhow::Error, verbose: u8) -> ! {
    error!("Fatal error: {}", error);
    std::process::exit(report_error(&error, verbose))
}

/// Print `error` to stderr and pick its exit code
pub fn report_error(error: &anyhow::Error, verbose: u8) -> i32 {
    let (text, code) = render_error(error, verbose);
    eprintln!("{}", text);
    code
}

/// Text shown for `error` and the exit code it maps to
///
/// Errors that are not a `HarnessError` are reported under the generic code.
pub fn render_error(error: &anyhow::Error, verbose: u8) -> (String, i32) {
    if let Some(harness_err) = error.downcast_ref::<HarnessError>() {
        let mut text = harness_err.user_message();
        if verbose >= 1 {
            text.push_str(&format!("\n\nContext Chain:\n{}", harness_err.developer_message()));
        }
        return (text, harness_err.exit_code());
    }

    let code = ErrorCode::OTHER_GENERIC;
    let mut text = format!("Error [E{:04}]: {error}", code);
    if verbose >= 1 {
        text.push_str(&format!("\n\nError chain ({}):", describe_error_code(code)));
        for (i, cause) in error.chain().enumerate() {
            text.push_str(&format!("\n  {}: {}", i, cause));
        }
    }
    (text, 1)
}
