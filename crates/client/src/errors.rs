use std::io;
use thiserror::Error;

/// Failure taxonomy for the inference HTTP client.
///
/// Every public operation either returns a fully normalized result or exactly
/// one of these kinds. Nothing is retried or swallowed internally.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("error with server connection: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP call finished with status {status_code}: {api_message}")]
    Call { status_code: u16, api_message: String },

    #[error("invalid model identifier `{0}`, expected `project/version`")]
    InvalidModelIdentifier(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("use client mode `{required}` to run this operation")]
    WrongClientMode { required: &'static str },

    #[error("no model was selected to be used")]
    ModelNotSelected,

    #[error("model `{0}` is not initialised and its description cannot be retrieved")]
    ModelNotInitialized(String),

    #[error("model task `{0}` is not supported by the v1 client")]
    TaskTypeNotSupported(String),

    #[error("could not load image: {0}")]
    ImageLoading(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("image decoding failed: {0}")]
    ImageDecoding(#[from] image::ImageError),

    #[error("base64 decoding failed: {0}")]
    Base64Decoding(#[from] base64::DecodeError),

    #[error("malformed response payload: {0}")]
    ResponseParsing(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = ClientError::Call {
            status_code: 404,
            api_message: "model not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP call finished with status 404: model not found",
            "Call error should carry status code and API message"
        );

        let err = ClientError::InvalidModelIdentifier("some-model".to_string());
        assert_eq!(
            err.to_string(),
            "invalid model identifier `some-model`, expected `project/version`",
            "InvalidModelIdentifier should name the offending identifier"
        );

        let err = ClientError::WrongClientMode { required: "v1" };
        assert_eq!(
            err.to_string(),
            "use client mode `v1` to run this operation",
            "WrongClientMode should name the required mode"
        );

        let err = ClientError::ModelNotSelected;
        assert_eq!(err.to_string(), "no model was selected to be used");
    }

    #[test]
    fn test_error_conversion_from_io_error() {
        fn returns_io_error() -> std::result::Result<(), io::Error> {
            Err(io::Error::other("disk gone"))
        }

        fn uses_question_mark() -> Result<()> {
            returns_io_error()?;
            Ok(())
        }

        match uses_question_mark() {
            Err(ClientError::Io(e)) => assert_eq!(e.to_string(), "disk gone"),
            other => panic!("Expected Io variant, got {other:?}"),
        }
    }
}
