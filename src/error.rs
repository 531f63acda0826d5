//! Crate-wide error type.
//!
//! Errors carry the process exit code so that `main` can stay a thin shell.
//! The codes follow the failure taxonomy of the model:
//!
//! - `2`: malformed input or configuration (fatal before any model evaluation)
//! - `3`: not enough usable data to run anything
//! - `4`: numerical failure (singular thermal system, non-finite solve output)
//!
//! Interpolation out-of-range and missing picks are *not* errors: they travel as
//! NaN through the resampling / residual / age pipeline.

pub const EXIT_INPUT: u8 = 2;
pub const EXIT_DATA: u8 = 3;
pub const EXIT_NUMERIC: u8 = 4;

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

    /// Malformed input tables, grids or configuration.
    pub fn input(message: impl Into<String>) -> Self {
        Self::new(EXIT_INPUT, message)
    }

    /// Nothing left to compute on.
    pub fn data(message: impl Into<String>) -> Self {
        Self::new(EXIT_DATA, message)
    }

    /// Singular or ill-conditioned linear algebra.
    pub fn numeric(message: impl Into<String>) -> Self {
        Self::new(EXIT_NUMERIC, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_numeric(&self) -> bool {
        self.exit_code == EXIT_NUMERIC
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_map_to_exit_codes() {
        assert_eq!(AppError::input("x").exit_code(), 2);
        assert_eq!(AppError::data("x").exit_code(), 3);
        assert_eq!(AppError::numeric("x").exit_code(), 4);
        assert!(AppError::numeric("x").is_numeric());
        assert_eq!(AppError::input("bad column").to_string(), "bad column");
    }
}
