use std::path::PathBuf;

/// Result type alias for stackscore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for stackscore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// External command errors (spawn or wait failures)
    #[error("{}", format_command_error(.command, .args, .message, .exit_code))]
    CommandExecution {
        command: String,
        args: Vec<String>,
        message: String,
        exit_code: Option<i32>,
    },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// File system operations
    #[error("file system {operation} operation failed for '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Package manifest errors
    #[error("invalid manifest '{path}': {message}")]
    Manifest { path: PathBuf, message: String },

    /// Network-related errors
    #[error("network error for '{endpoint}': {message}")]
    Network { endpoint: String, message: String },
}

fn format_command_error(
    command: &str,
    args: &[String],
    message: &str,
    exit_code: &Option<i32>,
) -> String {
    let args_str = args.join(" ");
    let invocation = if args_str.is_empty() {
        command.to_string()
    } else {
        format!("{command} {args_str}")
    };
    match exit_code {
        Some(code) => format!("command '{invocation}' failed with exit code {code}: {message}"),
        None => format!("command '{invocation}' failed: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_includes_args_and_code() {
        let err = Error::CommandExecution {
            command: "node".to_string(),
            args: vec!["cli.js".to_string(), "load".to_string()],
            message: "boom".to_string(),
            exit_code: Some(3),
        };
        assert_eq!(
            err.to_string(),
            "command 'node cli.js load' failed with exit code 3: boom"
        );
    }

    #[test]
    fn command_error_without_args() {
        let err = Error::CommandExecution {
            command: "tool".to_string(),
            args: vec![],
            message: "not found".to_string(),
            exit_code: None,
        };
        assert_eq!(err.to_string(), "command 'tool' failed: not found");
    }
}
