use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    #[error("Invalid session state: {details}")]
    InvalidState { details: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl ScanError {
    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state<S: Into<String>>(details: S) -> Self {
        Self::InvalidState {
            details: details.into(),
        }
    }
}

/// Rejections produced by the shared code validation path
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Code too short: {length} characters (minimum {min})")]
    TooShort { length: usize, min: usize },

    #[error("Code too long: {length} characters (maximum {max})")]
    TooLong { length: usize, max: usize },

    #[error("Code contains no letters or digits")]
    InvalidFormat,
}

/// Capture device failures, fatal to the current session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("No media capture API available on this platform")]
    NoCaptureApi,

    #[error("Permission denied for capture device {device}")]
    PermissionDenied { device: String },

    #[error("No capture devices found")]
    NoDevicesFound,

    #[error("Capture device {device} unavailable: {details}")]
    Unavailable { device: String, details: String },
}

impl DeviceError {
    /// Message suitable for showing to the operator
    pub fn user_message(&self) -> String {
        match self {
            DeviceError::NoCaptureApi => "This terminal has no camera support".to_string(),
            DeviceError::PermissionDenied { .. } => {
                "Camera access was denied, grant permission and try again".to_string()
            }
            DeviceError::NoDevicesFound => "No camera was found".to_string(),
            DeviceError::Unavailable { device, .. } => {
                format!("Camera {} could not be opened, pick another device", device)
            }
        }
    }
}

/// Rejection reported by the consumer's scan handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConsumerError {
    pub message: String,
}

impl ConsumerError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
