//! Everything one running task may touch.

use std::sync::Arc;

use lakeflow_shared::{Connection, LakeflowError, Result, TaskOptions, decode_options};
use lakeflow_storage::Storage;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;

/// Items requested per page when the config does not say otherwise.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Per-task execution context handed to every subtask.
///
/// Tasks share nothing in memory except the store; the options map carries
/// every value a task needs.
pub struct TaskContext {
    pub options: TaskOptions,
    pub storage: Arc<Storage>,
    pub cancel: CancellationToken,
    pub page_size: u32,
    connection: Option<Connection>,
    client: Option<Arc<ApiClient>>,
}

impl TaskContext {
    pub fn new(options: TaskOptions, storage: Arc<Storage>, cancel: CancellationToken) -> Self {
        Self {
            options,
            storage,
            cancel,
            page_size: DEFAULT_PAGE_SIZE,
            connection: None,
            client: None,
        }
    }

    /// Bind the task to a connection and its API client.
    pub fn with_connection(mut self, connection: Connection, client: Arc<ApiClient>) -> Self {
        self.connection = Some(connection);
        self.client = Some(client);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| LakeflowError::validation("task is not bound to a connection"))
    }

    pub fn client(&self) -> Result<&ApiClient> {
        self.client
            .as_deref()
            .ok_or_else(|| LakeflowError::validation("task is not bound to a connection"))
    }

    /// Decode the task options into a typed struct.
    pub fn options<T: DeserializeOwned>(&self) -> Result<T> {
        decode_options(&self.options)
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(LakeflowError::Cancelled)
        } else {
            Ok(())
        }
    }
}
