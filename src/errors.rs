use serde::Serialize;
use thiserror::Error;

/// Failures surfaced by the query gateway.
///
/// The `Display` text of each variant is the human-readable message returned to the
/// caller in the `error` field of the envelope.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Not connected to database. Please connect first.")]
    NotConnected,

    #[error("Query is required")]
    MissingQuery,

    #[error("Invalid method call format")]
    InvalidMethodCall,

    #[error("Invalid query arguments: {0}")]
    InvalidArguments(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Query must start with db.collection.method() or be valid JSON")]
    Syntax,

    #[error("Invalid query format")]
    Execution(String),

    // Internal details stay out of the Display message so they never reach the caller.
    #[error("Failed to execute query")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Internal(_) => 500,
            _ => 400,
        }
    }

    /// Short stable identifier, used in logs.
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Self::NotConnected => "NotConnected",
            Self::MissingQuery => "MissingQuery",
            Self::InvalidMethodCall => "InvalidMethodCall",
            Self::InvalidArguments(_) => "InvalidArguments",
            Self::UnsupportedOperation(_) => "UnsupportedOperation",
            Self::Syntax => "Syntax",
            Self::Execution(_) => "Execution",
            Self::Internal(_) => "Internal",
        }
    }

    /// Caller-visible details, if any.
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Execution(msg) => Some(msg),
            _ => None,
        }
    }
}

impl Serialize for GatewayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut ser = serializer.serialize_map(None)?;
        ser.serialize_entry("error", &self.to_string())?;
        if let Some(details) = self.details() {
            ser.serialize_entry("details", details)?;
        }
        ser.end()
    }
}

impl From<mongodb::error::Error> for GatewayError {
    fn from(e: mongodb::error::Error) -> Self {
        Self::Execution(e.to_string())
    }
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Failures while loading configuration or seed data at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid seed data: {0}")]
    Seed(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
