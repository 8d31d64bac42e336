use libsysconf_core::Service;
use libsysconf_ipc::IpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("No {0} available")]
    NoData(&'static str),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn no_data(service: Service) -> Self {
        CliError::NoData(service.description())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::NoData(_) => 2,
            CliError::Ipc(e) if e.is_fatal() => 3,
            CliError::Ipc(_) | CliError::Json(_) => 1,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CliError::NoData(_) => "no_data",
            CliError::Ipc(e) if e.is_fatal() => "corrupt_transport",
            CliError::Ipc(_) => "ipc",
            CliError::Json(_) => "json",
        }
    }
}
