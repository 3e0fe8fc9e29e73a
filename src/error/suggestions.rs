//! Context-aware error suggestions.
//!
//! Complements the static suggestions in the `codes` module with hints built
//! from the error's detail map.

use serde_json::Value;

use super::codes::ErrorCode;

/// Generate a context-aware suggestion for an error.
///
/// Falls back to [`ErrorCode::suggestion`] when the context carries nothing
/// more specific.
pub fn suggest_for_error(code: ErrorCode, context: Option<&Value>) -> String {
    match code {
        ErrorCode::RateLimited => suggest_rate_limited(context),
        ErrorCode::Timeout => suggest_timeout(context),
        ErrorCode::PackagingFailed => suggest_packaging_failed(context),
        ErrorCode::ChecksumMismatch => suggest_checksum_mismatch(context),
        ErrorCode::UnsafeOutputPath => suggest_unsafe_output_path(context),
        ErrorCode::ConfigMissingRequired => suggest_config_missing_required(context),
        ErrorCode::UnknownFormat => suggest_unknown_format(context),
        _ => code.suggestion().to_string(),
    }
}

fn str_field<'a>(context: Option<&'a Value>, key: &str) -> Option<&'a str> {
    context.and_then(|c| c.get(key)).and_then(Value::as_str)
}

fn suggest_rate_limited(context: Option<&Value>) -> String {
    let retry_after = context
        .and_then(|c| c.get("retry_after_seconds"))
        .and_then(Value::as_u64);

    match retry_after {
        Some(secs) => format!(
            "Rate limit exhausted. Retry in {secs}s (about {} min); nothing was sent to the host",
            secs.div_ceil(60)
        ),
        None => ErrorCode::RateLimited.suggestion().to_string(),
    }
}

fn suggest_timeout(context: Option<&Value>) -> String {
    let operation = str_field(context, "operation");
    let secs = context
        .and_then(|c| c.get("timeout_seconds"))
        .and_then(Value::as_u64);

    match (operation, secs) {
        (Some(op), Some(secs)) => format!(
            "`{op}` did not finish within {secs}s. Retry the command; previous steps are safe to repeat"
        ),
        _ => ErrorCode::Timeout.suggestion().to_string(),
    }
}

fn suggest_packaging_failed(context: Option<&Value>) -> String {
    let stage = str_field(context, "stage");
    let partial = str_field(context, "partial_path");

    match (stage, partial) {
        (Some(stage), Some(path)) => format!(
            "Packaging stopped during {stage}. Remove the partial output at {path} and retry"
        ),
        (Some(stage), None) => format!(
            "Packaging stopped during {stage}. Check permissions and free space, then retry"
        ),
        _ => ErrorCode::PackagingFailed.suggestion().to_string(),
    }
}

fn suggest_checksum_mismatch(context: Option<&Value>) -> String {
    match str_field(context, "path") {
        Some(path) => format!(
            "'{path}' does not match the manifest. Re-download the package, or extract without validation to inspect it"
        ),
        None => ErrorCode::ChecksumMismatch.suggestion().to_string(),
    }
}

fn suggest_unsafe_output_path(context: Option<&Value>) -> String {
    match str_field(context, "path") {
        Some(path) => format!(
            "Refusing to write into {path}. Pass a regular directory such as ./packages"
        ),
        None => ErrorCode::UnsafeOutputPath.suggestion().to_string(),
    }
}

fn suggest_config_missing_required(context: Option<&Value>) -> String {
    match str_field(context, "config_key") {
        Some(key) => format!("Set `{key}` in .abg/config.toml or through its ABG_* variable"),
        None => ErrorCode::ConfigMissingRequired.suggestion().to_string(),
    }
}

fn suggest_unknown_format(context: Option<&Value>) -> String {
    match str_field(context, "format") {
        Some(format) => format!(
            "'{format}' is not a package format. Use one of: tar-gz, zip, directory, agentpkg"
        ),
        None => ErrorCode::UnknownFormat.suggestion().to_string(),
    }
}
