use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ApiError {
    #[display("Unable to reach the Catalog API: {_0}")]
    Transport(reqwest_middleware::Error),
    #[display("Catalog API responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[display("Catalog API payload error: {_0}")]
    Json(serde_json::Error),
    #[error(ignore)]
    #[display("Authentication failed: {_0}")]
    Auth(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// True when the API never answered, as opposed to answering with an error.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(reqwest_middleware::Error::Reqwest(err))
    }
}

impl From<reqwest_middleware::Error> for ApiError {
    fn from(err: reqwest_middleware::Error) -> Self {
        Self::Transport(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
