use thiserror::Error;

use crate::model::{AssignmentError, ProgressError};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Assignment(#[from] AssignmentError),
}
