use thiserror::Error;

/// Failures raised by the unmixing core.
///
/// Precondition violations are never retried: callers fix their inputs and
/// run the whole operation again.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("{what}: expected {expected} values but got {actual}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("endmember list is empty")]
    EmptyEndmemberList,

    #[error("cannot detect band axis of cube with shape {shape:?}: band count must be strictly smaller than both spatial dimensions")]
    AmbiguousBandAxis { shape: [usize; 3] },

    #[error("design matrix has no endmember columns")]
    EmptyDesignMatrix,

    #[error("{endmembers} endmembers cannot be resolved from {bands} bands")]
    Underdetermined { endmembers: usize, bands: usize },

    #[error("design matrix is singular; endmembers are linearly dependent")]
    SingularDesign,

    #[error("array shape error: {0}")]
    Shape(String),

    #[error("endmember '{0}' has the same name as an existing endmember")]
    DuplicateEndmember(String),

    #[error("virtual {0} already exists in this model")]
    VirtualAlreadyExists(&'static str),

    #[error("saving to .{0} has not been implemented")]
    NotImplemented(&'static str),

    #[error("unsupported file extension: .{0}")]
    UnsupportedExtension(String),
}

impl From<ndarray::ShapeError> for Error {
    fn from(err: ndarray::ShapeError) -> Self {
        Error::Shape(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
