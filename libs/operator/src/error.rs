use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    KubeError(String, #[source] Box<kube::Error>),

    #[error("formatting error: {0}")]
    FormattingError(#[source] std::fmt::Error),

    #[error("missing object: {0}")]
    MissingObject(&'static str),

    #[error("invalid OIDC client config: {0}")]
    InvalidClientConfig(&'static str),

    #[error("console is in an unknown management state")]
    UnknownManagementState,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        format!("{self:?}").to_lowercase()
    }
}
