use thiserror::Error;

#[derive(Error, Debug)]
pub enum DopplerError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid map: {0}")]
    InvalidMap(String),

    #[error("Invalid spectrum {index}: {reason}")]
    InvalidSpectrum { index: usize, reason: String },

    #[error("Invalid dataset: {0}")]
    InvalidDataset(String),

    #[error("Invalid MEM parameter: {0}")]
    InvalidParameter(String),

    #[error("Array length mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("No line of the map projects into the wavelength range of the data")]
    NoOverlap,

    #[error("Non-finite {0} gradient")]
    NonFiniteGradient(&'static str),

    #[error("Lagrange multiplier search failed: {0}")]
    MultiplierSearch(String),

    #[error("MEM iteration {iteration} failed: {source}")]
    IterationFailed {
        iteration: usize,
        source: Box<DopplerError>,
    },

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Unable to (de)serialise document: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Gaussian noise generation failed: {0:?}")]
    NoiseInjectionError(rand_distr::NormalError),
}

impl From<rand_distr::NormalError> for DopplerError {
    fn from(err: rand_distr::NormalError) -> Self {
        DopplerError::NoiseInjectionError(err)
    }
}

impl DopplerError {
    /// True for errors raised by input validation, before any iteration starts.
    pub fn is_structural(&self) -> bool {
        use DopplerError::*;
        matches!(
            self,
            InvalidImage(_)
                | InvalidMap(_)
                | InvalidSpectrum { .. }
                | InvalidDataset(_)
                | InvalidParameter(_)
                | ShapeMismatch { .. }
                | NoOverlap
        )
    }
}

impl PartialEq for DopplerError {
    fn eq(&self, other: &Self) -> bool {
        use DopplerError::*;
        match (self, other) {
            (InvalidImage(a), InvalidImage(b)) => a == b,
            (InvalidMap(a), InvalidMap(b)) => a == b,
            (
                InvalidSpectrum {
                    index: i1,
                    reason: r1,
                },
                InvalidSpectrum {
                    index: i2,
                    reason: r2,
                },
            ) => i1 == i2 && r1 == r2,
            (InvalidDataset(a), InvalidDataset(b)) => a == b,
            (InvalidParameter(a), InvalidParameter(b)) => a == b,
            (
                ShapeMismatch {
                    context: c1,
                    expected: e1,
                    found: f1,
                },
                ShapeMismatch {
                    context: c2,
                    expected: e2,
                    found: f2,
                },
            ) => c1 == c2 && e1 == e2 && f1 == f2,
            (NonFiniteGradient(a), NonFiniteGradient(b)) => a == b,
            (MultiplierSearch(a), MultiplierSearch(b)) => a == b,
            (
                IterationFailed {
                    iteration: i1,
                    source: s1,
                },
                IterationFailed {
                    iteration: i2,
                    source: s2,
                },
            ) => i1 == i2 && s1 == s2,
            (NoiseInjectionError(a), NoiseInjectionError(b)) => a == b,

            // not comparable, same variant is enough
            (IoError(_), IoError(_)) => true,
            (JsonError(_), JsonError(_)) => true,

            (NoOverlap, NoOverlap) => true,

            _ => false,
        }
    }
}
