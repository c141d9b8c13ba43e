use thiserror::Error;

/// Main error type for the differentiation core
#[derive(Error, Debug, Clone)]
pub enum GradError {
    /// Backward popped a frame whose input count differs from the adapter's arity
    #[error("Arity mismatch in '{operator}': expected {expected} remembered inputs, got {got}")]
    ArityMismatch {
        operator: String,
        expected: usize,
        got: usize,
    },

    /// Backward called with no outstanding forward frame
    #[error("Empty trace: backward called on '{0}' without a matching forward")]
    EmptyTrace(String),

    /// Forward would exceed the operator's construction-time frame bound
    #[error("Trace overflow in '{operator}': more than {bound} outstanding forward calls")]
    TraceOverflow {
        operator: String,
        bound: usize,
    },

    /// Tensor consumed more often than its declared static limit
    #[error("Use limit exceeded for tensor {tensor}: limit is {limit}")]
    UseLimitExceeded {
        tensor: u64,
        limit: usize,
    },

    /// Shape-related errors with detailed suggestions
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Accelerated dispatch failed
    #[error("Accelerator error: {0}")]
    AcceleratorError(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl GradError {
    /// Create a shape error with helpful suggestions
    pub fn shape_error(expected: &str, got: &str, suggestion: Option<&str>) -> Self {
        let message = if let Some(sugg) = suggestion {
            format!("Expected {}, got {}. Suggestion: {}", expected, got, sugg)
        } else {
            format!("Expected {}, got {}", expected, got)
        };
        GradError::ShapeError(message)
    }

    pub fn arity(operator: &str, expected: usize, got: usize) -> Self {
        GradError::ArityMismatch {
            operator: operator.to_string(),
            expected,
            got,
        }
    }

    pub fn accelerator_error(kernel: &str, message: &str) -> Self {
        GradError::AcceleratorError(format!("Kernel '{}': {}", kernel, message))
    }
}

impl From<std::io::Error> for GradError {
    fn from(err: std::io::Error) -> Self {
        GradError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for GradError {
    fn from(err: serde_json::Error) -> Self {
        GradError::SerializationError(err.to_string())
    }
}

/// Result type for stackgrad operations
pub type GradResult<T> = Result<T, GradError>;

/// Error context for providing additional debugging information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operator: String,
    pub tensor_shapes: Vec<String>,
    pub pending_frames: Option<usize>,
    pub suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(operator: &str) -> Self {
        Self {
            operator: operator.to_string(),
            tensor_shapes: Vec::new(),
            pending_frames: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_shape(mut self, shape: &str) -> Self {
        self.tensor_shapes.push(shape.to_string());
        self
    }

    pub fn with_pending(mut self, pending: usize) -> Self {
        self.pending_frames = Some(pending);
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestions.push(suggestion.to_string());
        self
    }

    pub fn to_error_message(&self) -> String {
        let mut message = format!("Operator: {}", self.operator);

        if !self.tensor_shapes.is_empty() {
            message.push_str(&format!("\nTensor shapes: {}", self.tensor_shapes.join(", ")));
        }

        if let Some(pending) = self.pending_frames {
            message.push_str(&format!("\nPending frames: {}", pending));
        }

        if !self.suggestions.is_empty() {
            message.push_str("\nSuggestions:");
            for suggestion in &self.suggestions {
                message.push_str(&format!("\n  - {}", suggestion));
            }
        }

        message
    }
}

/// Helper trait for adding context to errors
pub trait WithContext<T> {
    fn with_context<F>(self, f: F) -> GradResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T> WithContext<T> for GradResult<T> {
    fn with_context<F>(self, f: F) -> GradResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| {
            let context = f();
            match e {
                GradError::ShapeError(msg) => {
                    GradError::ShapeError(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                GradError::InvalidInput(msg) => {
                    GradError::InvalidInput(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                GradError::InvalidState(msg) => {
                    GradError::InvalidState(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                GradError::AcceleratorError(msg) => {
                    GradError::AcceleratorError(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                _ => e,
            }
        })
    }
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ArityViolation,
    TraceViolation,
    UseLimit,
    ShapeMismatch,
    DispatchFailed,
    InvalidOperation,
    ConfigInvalid,
    SerializationFailed,
}

impl GradError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            GradError::ArityMismatch { .. } => ErrorCode::ArityViolation,
            GradError::EmptyTrace(_) => ErrorCode::TraceViolation,
            GradError::TraceOverflow { .. } => ErrorCode::TraceViolation,
            GradError::UseLimitExceeded { .. } => ErrorCode::UseLimit,
            GradError::ShapeError(_) => ErrorCode::ShapeMismatch,
            GradError::AcceleratorError(_) => ErrorCode::DispatchFailed,
            GradError::InvalidInput(_) => ErrorCode::InvalidOperation,
            GradError::InvalidState(_) => ErrorCode::InvalidOperation,
            GradError::ConfigurationError(_) => ErrorCode::ConfigInvalid,
            GradError::SerializationError(_) => ErrorCode::SerializationFailed,
            GradError::IoError(_) => ErrorCode::InvalidOperation,
        }
    }

    /// Errors raised inside a pass are fatal to it; only configuration
    /// problems, which happen outside any pass, can be retried.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.code(), ErrorCode::ConfigInvalid)
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            GradError::ArityMismatch { operator, .. } => {
                format!("{}\n\nThe replay frame popped by '{}' does not match its arity. Backward calls must mirror forward calls in exact reverse order.", self, operator)
            }
            GradError::EmptyTrace(operator) => {
                format!("{}\n\nEvery backward call on '{}' needs an outstanding forward call. Check that backward is not called twice for the same output.", self, operator)
            }
            GradError::AcceleratorError(msg) => {
                format!("Accelerator Error: {}\n\nThe accelerated dispatch failed and the pass was aborted. Disable acceleration on the operator to fall back to the CPU path.", msg)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error() {
        let error = GradError::shape_error("[2, 3]", "[2, 4]", Some("Check the per-sample shape of the input"));
        assert!(error.to_string().contains("Expected [2, 3], got [2, 4]"));
        assert!(error.to_string().contains("Check the per-sample shape"));
    }

    #[test]
    fn test_error_context() {
        let context = ErrorContext::new("dense")
            .with_shape("[4]")
            .with_shape("[8]")
            .with_pending(3)
            .with_suggestion("Pop frames in reverse order");

        let message = context.to_error_message();
        assert!(message.contains("Operator: dense"));
        assert!(message.contains("Tensor shapes: [4], [8]"));
        assert!(message.contains("Pending frames: 3"));
        assert!(message.contains("Pop frames in reverse order"));
    }

    #[test]
    fn test_with_context_appends_message() {
        let result: GradResult<()> = Err(GradError::InvalidState("underflow".to_string()));
        let err = result
            .with_context(|| ErrorContext::new("scale").with_pending(0))
            .unwrap_err();
        assert!(err.to_string().contains("underflow"));
        assert!(err.to_string().contains("Operator: scale"));
    }

    #[test]
    fn test_error_codes() {
        let arity = GradError::arity("relu", 1, 2);
        assert_eq!(arity.code(), ErrorCode::ArityViolation);
        assert!(!arity.is_recoverable());

        let config = GradError::ConfigurationError("bad level".to_string());
        assert_eq!(config.code(), ErrorCode::ConfigInvalid);
        assert!(config.is_recoverable());
    }

    #[test]
    fn test_user_message() {
        let error = GradError::EmptyTrace("dropout".to_string());
        let message = error.user_message();
        assert!(message.contains("dropout"));
        assert!(message.contains("outstanding forward call"));
    }
}
