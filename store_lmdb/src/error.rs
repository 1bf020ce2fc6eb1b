use thiserror::Error;

#[derive(Debug, Error)]
pub enum LmdbError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupted record in '{db}': {reason}")]
    Corruption { db: &'static str, reason: String },
}

impl From<bincode::Error> for LmdbError {
    fn from(e: bincode::Error) -> Self {
        LmdbError::Serialization(e.to_string())
    }
}

impl From<LmdbError> for lattice_store::StoreError {
    fn from(e: LmdbError) -> Self {
        match e {
            LmdbError::Serialization(msg) => lattice_store::StoreError::Serialization(msg),
            LmdbError::Corruption { db, reason } => {
                lattice_store::StoreError::Corruption(format!("{db}: {reason}"))
            }
            other => lattice_store::StoreError::Backend(other.to_string()),
        }
    }
}
