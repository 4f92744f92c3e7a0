use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("could not reach the highlights list after {attempts} attempts")]
    SessionUnavailable { attempts: u32 },
    #[error("book '{0}' not found in the highlights list")]
    RecordNotFound(String),
    #[error(transparent)]
    Browser(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no sync target: set a parent page id or a database id")]
    InvalidTarget,
    #[error("duplicate title '{0}' in rows to sync")]
    DuplicateTitle(String),
    #[error("failed to transform '{title}'")]
    Transform {
        title: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("sync aborted while writing '{title}'")]
    Abort {
        title: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}
