use std::error::Error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Image(#[from] image::ImageError),
    #[error("{1}: {0}")]
    InternalError(Box<dyn Error + Send + Sync>, &'static str),
    #[error("{failed} of {total} downloads failed")]
    Incomplete { failed: usize, total: usize },
    #[error("Interrupted")]
    Interrupted,
}

impl AppError {
    pub fn internal(e: impl Error + Send + Sync + 'static, msg: &'static str) -> Self {
        Self::InternalError(e.into(), msg)
    }
}

pub trait ConvertError<T> {
    fn map_internal(self, msg: &'static str) -> Result<T, AppError>;
}

impl<T, E: Error + Send + Sync + 'static> ConvertError<T> for Result<T, E> {
    fn map_internal(self, msg: &'static str) -> Result<T, AppError> {
        self.map_err(|e| AppError::internal(e, msg))
    }
}
