#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("unknown connection")]
    UnknownConnection,
}
