use std::fmt;

/// Core error types for the flow engine
#[derive(Debug)]
pub enum CoreError {
    /// Configuration-related errors
    Config(ConfigError),

    /// Network and HTTP-related errors
    Network(NetworkError),

    /// Action handler errors (protocol-level failures reported by a handler)
    Handler(HandlerError),

    /// Flow/step execution errors
    Flow(FlowError),

    /// File I/O and validation errors
    File(FileError),

    /// Input validation errors
    Validation(ValidationError),

    /// Database and storage errors
    Storage(StorageError),

    /// Internal system errors
    Internal(String),
}

/// Configuration-related errors
#[derive(Debug)]
pub enum ConfigError {
    /// Missing required configuration parameter
    MissingParameter(String),

    /// Invalid configuration value
    InvalidValue {
        parameter: String,
        value: String,
        expected: String,
    },

    /// Configuration file not found
    FileNotFound(String),

    /// Invalid configuration format
    InvalidFormat(String),

    /// Environment variable resolution failed
    EnvironmentResolution(String),

    /// Credential resolution failed
    CredentialResolution(String),
}

/// Network and HTTP-related errors
#[derive(Debug)]
pub enum NetworkError {
    /// HTTP request failed
    RequestFailed {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// Connection timeout
    Timeout(String),

    /// DNS resolution failed
    DnsResolution(String),

    /// TLS error
    TlsError(String),

    /// Invalid URL
    InvalidUrl(String),

    /// Network unreachable
    NetworkUnreachable,

    /// Rate limit exceeded
    RateLimitExceeded { retry_after: Option<u64> },
}

/// Errors surfaced by an action handler during `execute`
#[derive(Debug)]
pub enum HandlerError {
    /// No handler registered for the given action tag
    UnknownAction(String),

    /// The handler rejected its (already-resolved) configuration
    InvalidConfig { action: String, reason: String },

    /// The handler's protocol call failed
    CallFailed { action: String, reason: String },

    /// The handler does not support a requested capability
    Unsupported { action: String, capability: String },
}

/// Flow and step execution errors — corresponds to the core's error-kind taxonomy
#[derive(Debug)]
pub enum FlowError {
    /// Flow/step document failed schema or semantic validation
    Validation(String),

    /// Step references an action tag with no registered handler
    UnknownAction(String),

    /// A `${...}` reference could not be resolved (strict mode)
    UnresolvedReference(String),

    /// Action handler returned a failure
    HandlerError(String),

    /// A step or attempt exceeded its timeout
    Timeout { step_id: String, seconds: f64 },

    /// One or more assertions failed on a step
    AssertionFailed {
        step_id: String,
        failed: Vec<String>,
    },

    /// Execution was cancelled
    Cancelled,

    /// A `sub_flow` step's invoked flow terminated with a non-passed status
    SubFlowError { flow_ref: String, status: String },

    /// `wait_until` / `wait_for` / `db_poll` exceeded `max_duration`
    PollingTimeout { step_id: String },

    /// Internal invariant violation — should not occur in correct operation
    Internal(String),
}

/// File I/O and validation errors
#[derive(Debug)]
pub enum FileError {
    NotFound(String),
    PermissionDenied(String),
    InvalidFormat { file: String, expected: String },
    TooLarge { file: String, size: u64, max_size: u64 },
    PathTraversal(String),
    UnsupportedType(String),
    Corrupted(String),
}

/// Input validation errors
#[derive(Debug)]
pub enum ValidationError {
    InvalidFormat { input: String, expected: String },
    TooLong { input: String, length: usize, max_length: usize },
    TooShort { input: String, length: usize, min_length: usize },
    DangerousPattern(String),
    MissingField(String),
    InvalidCharacter { input: String, character: char },
    JsonValidation(String),
}

/// Database and storage errors
#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed(String),
    QueryFailed(String),
    TransactionFailed(String),
    NotFound(String),
    ConstraintViolation(String),
    SerializationFailed(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Config(e) => write!(f, "Configuration error: {}", e),
            CoreError::Network(e) => write!(f, "Network error: {}", e),
            CoreError::Handler(e) => write!(f, "Handler error: {}", e),
            CoreError::Flow(e) => write!(f, "Flow error: {}", e),
            CoreError::File(e) => write!(f, "File error: {}", e),
            CoreError::Validation(e) => write!(f, "Validation error: {}", e),
            CoreError::Storage(e) => write!(f, "Storage error: {}", e),
            CoreError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingParameter(param) => write!(f, "Missing required parameter: {}", param),
            ConfigError::InvalidValue { parameter, value, expected } => {
                write!(f, "Invalid value '{}' for parameter '{}', expected: {}", value, parameter, expected)
            }
            ConfigError::FileNotFound(file) => write!(f, "Configuration file not found: {}", file),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid configuration format: {}", msg),
            ConfigError::EnvironmentResolution(var) => write!(f, "Failed to resolve environment variable: {}", var),
            ConfigError::CredentialResolution(cred) => write!(f, "Failed to resolve credential: {}", cred),
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::RequestFailed { url, status, message } => match status {
                Some(code) => write!(f, "HTTP request to {} failed with status {}: {}", url, code, message),
                None => write!(f, "HTTP request to {} failed: {}", url, message),
            },
            NetworkError::Timeout(url) => write!(f, "Request timeout for: {}", url),
            NetworkError::DnsResolution(host) => write!(f, "DNS resolution failed for: {}", host),
            NetworkError::TlsError(reason) => write!(f, "TLS error: {}", reason),
            NetworkError::InvalidUrl(url) => write!(f, "Invalid URL: {}", url),
            NetworkError::NetworkUnreachable => write!(f, "Network unreachable"),
            NetworkError::RateLimitExceeded { retry_after } => match retry_after {
                Some(seconds) => write!(f, "Rate limit exceeded, retry after {} seconds", seconds),
                None => write!(f, "Rate limit exceeded"),
            },
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::UnknownAction(action) => write!(f, "no handler registered for action '{}'", action),
            HandlerError::InvalidConfig { action, reason } => {
                write!(f, "handler '{}' rejected its configuration: {}", action, reason)
            }
            HandlerError::CallFailed { action, reason } => write!(f, "handler '{}' call failed: {}", action, reason),
            HandlerError::Unsupported { action, capability } => {
                write!(f, "handler '{}' does not support '{}'", action, capability)
            }
        }
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Validation(msg) => write!(f, "flow validation failed: {}", msg),
            FlowError::UnknownAction(action) => write!(f, "unknown action: {}", action),
            FlowError::UnresolvedReference(reference) => write!(f, "unresolved reference: {}", reference),
            FlowError::HandlerError(msg) => write!(f, "handler error: {}", msg),
            FlowError::Timeout { step_id, seconds } => {
                write!(f, "step '{}' timed out after {:.1}s", step_id, seconds)
            }
            FlowError::AssertionFailed { step_id, failed } => {
                write!(f, "step '{}' failed {} assertion(s): {}", step_id, failed.len(), failed.join("; "))
            }
            FlowError::Cancelled => write!(f, "execution cancelled"),
            FlowError::SubFlowError { flow_ref, status } => {
                write!(f, "sub-flow '{}' terminated with status '{}'", flow_ref, status)
            }
            FlowError::PollingTimeout { step_id } => write!(f, "step '{}' exceeded max_duration while polling", step_id),
            FlowError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::NotFound(file) => write!(f, "File not found: {}", file),
            FileError::PermissionDenied(file) => write!(f, "Permission denied: {}", file),
            FileError::InvalidFormat { file, expected } => {
                write!(f, "Invalid format for file '{}', expected: {}", file, expected)
            }
            FileError::TooLarge { file, size, max_size } => {
                write!(f, "File '{}' too large: {} bytes (max: {} bytes)", file, size, max_size)
            }
            FileError::PathTraversal(path) => write!(f, "Path traversal attempt detected: {}", path),
            FileError::UnsupportedType(file_type) => write!(f, "Unsupported file type: {}", file_type),
            FileError::Corrupted(file) => write!(f, "File corrupted: {}", file),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidFormat { input, expected } => {
                write!(f, "Invalid format for input '{}', expected: {}", input, expected)
            }
            ValidationError::TooLong { input, length, max_length } => {
                write!(f, "Input '{}' too long: {} characters (max: {})", input, length, max_length)
            }
            ValidationError::TooShort { input, length, min_length } => {
                write!(f, "Input '{}' too short: {} characters (min: {})", input, length, min_length)
            }
            ValidationError::DangerousPattern(pattern) => write!(f, "Dangerous pattern detected: {}", pattern),
            ValidationError::MissingField(field) => write!(f, "Required field missing: {}", field),
            ValidationError::InvalidCharacter { input, character } => {
                write!(f, "Invalid character '{}' in input: {}", character, input)
            }
            ValidationError::JsonValidation(msg) => write!(f, "JSON validation failed: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => write!(f, "Storage connection failed: {}", msg),
            StorageError::QueryFailed(msg) => write!(f, "Query execution failed: {}", msg),
            StorageError::TransactionFailed(msg) => write!(f, "Transaction failed: {}", msg),
            StorageError::NotFound(item) => write!(f, "Item not found in storage: {}", item),
            StorageError::ConstraintViolation(msg) => write!(f, "Constraint violation: {}", msg),
            StorageError::SerializationFailed(msg) => write!(f, "Serialization failed: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for NetworkError {}
impl std::error::Error for HandlerError {}
impl std::error::Error for FlowError {}
impl std::error::Error for FileError {}
impl std::error::Error for ValidationError {}
impl std::error::Error for StorageError {}

/// Result type alias for flow engine operations
pub type CoreResult<T> = Result<T, CoreError>;

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CoreError::Network(NetworkError::Timeout(
                err.url().map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string()),
            ))
        } else if err.is_connect() {
            CoreError::Network(NetworkError::NetworkUnreachable)
        } else if let Some(status) = err.status() {
            CoreError::Network(NetworkError::RequestFailed {
                url: err.url().map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string()),
                status: Some(status.as_u16()),
                message: err.to_string(),
            })
        } else {
            CoreError::Network(NetworkError::RequestFailed {
                url: err.url().map(|u| u.to_string()).unwrap_or_else(|| "unknown".to_string()),
                status: None,
                message: err.to_string(),
            })
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => CoreError::File(FileError::NotFound(err.to_string())),
            std::io::ErrorKind::PermissionDenied => CoreError::File(FileError::PermissionDenied(err.to_string())),
            _ => CoreError::File(FileError::Corrupted(err.to_string())),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Validation(ValidationError::JsonValidation(err.to_string()))
    }
}

impl From<url::ParseError> for CoreError {
    fn from(err: url::ParseError) -> Self {
        CoreError::Network(NetworkError::InvalidUrl(err.to_string()))
    }
}
