use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Client,
    api::{Api, AttachParams},
};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{
    domain::error::OperatorError,
    infrastructure::cluster::repositories::resources::CONTAINER_NAME,
};

/// Gathers the whole stream before decoding, so a character split across chunks
/// survives.
async fn collect_output(reader: impl AsyncRead + Unpin) -> String {
    let mut stream = ReaderStream::new(reader);
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(e) => {
                debug!(error = %e, "exec stream ended early");
                break;
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Runs `command` in the database container of `pod` and returns its stdout.
///
/// A command that ran but exited non-zero is reported as `ProbeFailing`; failing to
/// reach the pod at all is `PlatformUnavailable`.
pub async fn exec_in_member(
    client: &Client,
    namespace: &str,
    pod: &str,
    command: Vec<String>,
) -> Result<String, OperatorError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let rendered = command.join(" ");
    debug!(%pod, command = %rendered, "exec in member");

    let mut attached = pods
        .exec(
            pod,
            command,
            &AttachParams::default()
                .container(CONTAINER_NAME)
                .stdout(true)
                .stderr(true),
        )
        .await?;

    let stdout = attached
        .stdout()
        .ok_or_else(|| OperatorError::platform(format!("no stdout attached for {pod}")))?;
    let stderr = attached
        .stderr()
        .ok_or_else(|| OperatorError::platform(format!("no stderr attached for {pod}")))?;
    let status = attached.take_status();

    let (out, err) = tokio::join!(collect_output(stdout), collect_output(stderr));
    let status = match status {
        Some(status) => status.await,
        None => None,
    };
    attached
        .join()
        .await
        .map_err(|e| OperatorError::platform(format!("exec in {pod} aborted: {e}")))?;

    match status {
        Some(status) if status.status.as_deref() != Some("Success") => {
            let detail = if err.trim().is_empty() {
                status.message.unwrap_or_default()
            } else {
                err.trim().to_string()
            };
            Err(OperatorError::ProbeFailing {
                message: format!("`{rendered}` failed in {pod}: {detail}"),
            })
        }
        _ => Ok(out),
    }
}
