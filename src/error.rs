use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Degenerate calibration reference: both points are at ({0}, {1})")]
    DegenerateReference(f32, f32),

    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Calibration not found for key `{0}`")]
    CalibrationNotFound(String),

    #[error("Calibration already stored for key `{0}`")]
    CalibrationExists(String),

    #[error("Frame {got} arrived after frame {previous}")]
    FrameOutOfOrder { previous: u64, got: u64 },

    #[error("Frame stream closed before frame {0} was delivered")]
    StreamClosed(u64),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse Error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
}
