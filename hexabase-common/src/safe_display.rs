/// Renders a value for logs/diagnostics with secrets redacted.
///
/// Mirrors the teacher's `golem_common::SafeDisplay`: config and error types
/// implement this instead of leaning on `Debug`/`Display`, so a stray
/// `tracing::info!("{:?}", config)` can never leak a token or private key.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    /// Indents every line of `to_safe_string` by two spaces, for nesting
    /// inside another `SafeDisplay` implementation.
    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl SafeDisplay for String {
    fn to_safe_string(&self) -> String {
        self.clone()
    }
}
