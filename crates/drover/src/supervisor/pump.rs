use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use crate::loghub::{LogChannel, LogHub};

/// Read one child pipe line-by-line into the hub until the pipe closes.
///
/// `next_line` splits on LF and drops a trailing CR, so CRLF output is
/// published without the carriage return.
pub(crate) fn spawn_pump<R>(stream: R, hub: LogHub, channel: LogChannel) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => hub.publish(channel, line),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(%channel, error = %e, "log pump read failed");
                    break;
                }
            }
        }
    })
}
