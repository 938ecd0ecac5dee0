use std::fmt::Formatter;

#[derive(Debug, Clone, PartialEq)]
pub enum GrabError {
    InvalidUrl(String),
    ErrorCreatingDestinationDirectory(String),
    /// parameters are file path, additional error message
    FileOperationError {
        file_name: String,
        message: String,
    },
    NetworkError(String),
    ErrorStatusCode {
        status_code: String,
        url: String,
    },
    /// The listing service answered, but the payload is missing expected keys.
    MalformedResponse {
        url: String,
        message: String,
    },
    /// The listing service reported a failure in its JSON envelope.
    ListingRejected {
        code: i64,
        message: String,
    },
    UnknownError(String),
}

impl GrabError {
    pub(crate) fn file_operation(file_name: impl Into<String>, e: &std::io::Error) -> Self {
        GrabError::FileOperationError {
            file_name: file_name.into(),
            message: format!("{} | {}", e, e.kind()),
        }
    }
}

impl std::fmt::Display for GrabError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            GrabError::InvalidUrl(url) => format!("Invalid url received : {url}"),
            GrabError::ErrorCreatingDestinationDirectory(err) => {
                format!("error creating destination directory. {err}")
            }
            GrabError::FileOperationError { file_name, message } => {
                format!("{message} : {file_name}")
            }
            GrabError::NetworkError(err) => format!("error connecting to remote host. {err}"),
            GrabError::ErrorStatusCode { status_code, url } => {
                format!("server returned an error response. {url} => {status_code}")
            }
            GrabError::MalformedResponse { url, message } => {
                format!("unexpected response payload from {url}. {message}")
            }
            GrabError::ListingRejected { code, message } => {
                format!("listing request rejected with code {code}: {message}")
            }
            GrabError::UnknownError(err) => format!("an unknown error occurred. {err}"),
        };
        write!(f, "{str}")
    }
}

impl std::error::Error for GrabError {}
