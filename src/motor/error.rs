// Error types shared by the connection, encoder and driver layers

/// Malformed position response
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Expected AXIS:VALUE, got {token:?}")]
    MalformedToken { token: String },

    #[error("Non-numeric value for axis {axis}: {value:?}")]
    InvalidNumber { axis: String, value: String },

    #[error("No axis coordinates in {response:?}")]
    NoAxes { response: String },
}

/// Error types for the motion driver
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No serial port matching {hint:?}")]
    PortNotFound { hint: String },

    #[error("Driver has no open connection")]
    NotConnected,

    #[error("No acknowledgment received for {command:?}")]
    MissingAck { command: String },

    #[error("Invalid position response: {0}")]
    Parse(#[from] ParseError),

    #[error("Cannot use axis {0:?}")]
    InvalidAxis(char),

    #[error("Controller setup failed at {command:?}: {source}")]
    Configuration {
        command: String,
        #[source]
        source: Box<DriverError>,
    },
}

pub type Result<T> = std::result::Result<T, DriverError>;
