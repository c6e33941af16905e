use tracing::debug;

use crate::domain::{
    cluster::ports::{NetworkAttachmentRepository, RaftRepository, WorkloadRepository},
    common::OperatorConfig,
    error::OperatorError,
};

#[derive(Clone)]
pub struct Service<W, N, R>
where
    W: WorkloadRepository,
    N: NetworkAttachmentRepository,
    R: RaftRepository,
{
    pub(crate) workload_repository: W,
    pub(crate) attachment_repository: N,
    pub(crate) raft_repository: R,
    pub(crate) config: OperatorConfig,
}

impl<W, N, R> Service<W, N, R>
where
    W: WorkloadRepository,
    N: NetworkAttachmentRepository,
    R: RaftRepository,
{
    pub fn new(
        workload_repository: W,
        attachment_repository: N,
        raft_repository: R,
        config: OperatorConfig,
    ) -> Self {
        Service {
            workload_repository,
            attachment_repository,
            raft_repository,
            config,
        }
    }

    /// Runs an external call under the configured timeout. Elapsed time counts as
    /// the platform being unavailable.
    pub(crate) async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, OperatorError>>,
    ) -> Result<T, OperatorError> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(elapsed) => {
                debug!(timeout = ?self.config.call_timeout, "external call timed out");
                Err(elapsed.into())
            }
        }
    }
}
