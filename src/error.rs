/// Error carried up to `main`, which prints the message and exits with the code.
///
/// Exit codes:
/// - `2`: user input or filesystem problems (bad arguments, unreadable files,
///   existing output directory without `--force`)
/// - `3`: data validation (missing values, empty partitions, gradient-table
///   and volume count mismatch)
/// - `4`: environment, result aggregation and rendering (font not found,
///   missing centile files, plotting failures)
/// - `5`: one or more external fitting jobs failed
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
