//! Command dispatch: one Collaborator call per command, written back as a
//! response chain.
//!
//! Command channel: `[ack][exactly response_len bytes]`. The ack is written
//! before the handler runs; an unknown id gets a FAILURE ack and nothing else.
//!
//! Preview channel: no ack. Response chain elements are written back-to-back
//! in generation order, each released once fully written.

use camtune_core::codec::{encode_ack, fit_response};
use camtune_core::messages::NOT_SUPPORTED;
use camtune_core::{
    AckStatus, Collaborator, CommandId, CommandRequest, PreviewCommand, PreviewRequest,
    TuneError, TuneResult,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Outcome of one command-channel dispatch that reached the socket intact.
#[derive(Debug)]
pub struct DispatchReport {
    /// Ack byte that was sent.
    pub ack: AckStatus,
    /// Handler failure absorbed by the ack (the body was zero-filled).
    pub handler_error: Option<TuneError>,
}

/// Maps decoded commands onto the imaging pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Handle one command-channel request.
    ///
    /// Returns `Err` only for transport failures; handler failures are
    /// reported in [`DispatchReport::handler_error`] and the session continues.
    pub async fn dispatch_command<C, W>(
        pipeline: &mut C,
        handle: &C::Handle,
        request: &CommandRequest,
        out: &mut W,
    ) -> TuneResult<DispatchReport>
    where
        C: Collaborator,
        W: AsyncWrite + Unpin,
    {
        let Some(command) = CommandId::from_wire(request.command) else {
            debug!(command = request.command, "unknown command id");
            write_chain(out, [encode_ack(AckStatus::Failure).to_vec()]).await?;
            return Ok(DispatchReport {
                ack: AckStatus::Failure,
                handler_error: None,
            });
        };

        write_chain(out, [encode_ack(AckStatus::Success).to_vec()]).await?;

        let result = match command {
            CommandId::GetParameterList => Ok(pipeline.parameter_list(handle)),
            CommandId::GetParameters => Ok(pipeline.parameters(handle, &request.payload)),
            CommandId::SetParameters => pipeline.set_parameters(handle, &request.payload),
            CommandId::Misc(id) => Ok(pipeline.misc_command(handle, id, &request.payload)),
        };
        let (body, handler_error) = match result {
            Ok(body) => (body, None),
            Err(e) => (Vec::new(), Some(e)),
        };
        debug!(
            ?command,
            produced = body.len(),
            response_len = request.response_len,
            "command handled"
        );

        // The partial (here: empty) response still goes out before the failure surfaces.
        write_chain(out, [fit_response(body, request.response_len as usize)]).await?;

        Ok(DispatchReport {
            ack: AckStatus::Success,
            handler_error,
        })
    }

    /// Handle one preview-channel request, returning the number of response
    /// elements written. Any error ends the preview session.
    pub async fn dispatch_preview<C, W>(
        pipeline: &mut C,
        handle: &C::Handle,
        request: &PreviewRequest,
        out: &mut W,
    ) -> TuneResult<usize>
    where
        C: Collaborator,
        W: AsyncWrite + Unpin,
    {
        let chunk_size = request.chunk_size;
        let sent = match request.command {
            PreviewCommand::GetInfo => {
                let info = pipeline.preview_info(handle);
                write_chain(out, [info.version, info.capabilities]).await?
            }
            PreviewCommand::GetChunkSize => {
                write_chain(out, [chunk_size.to_le_bytes().to_vec()]).await?
            }
            PreviewCommand::ChangeChunkSize => {
                let mut element = vec![AckStatus::Success as u8];
                element.extend_from_slice(&chunk_size.to_le_bytes());
                write_chain(out, [element]).await?
            }
            PreviewCommand::GetFrame => {
                let tiles = pipeline.preview_frame(handle, chunk_size)?;
                write_chain(out, tiles).await?
            }
            PreviewCommand::JpegSnapshot
            | PreviewCommand::RawSnapshot
            | PreviewCommand::RawPreview => write_chain(out, [vec![NOT_SUPPORTED]]).await?,
        };
        debug!(command = ?request.command, chunk_size, elements = sent, "preview handled");
        Ok(sent)
    }
}

/// Write every element of a response chain in order, then flush.
async fn write_chain<W, I>(out: &mut W, chain: I) -> TuneResult<usize>
where
    W: AsyncWrite + Unpin,
    I: IntoIterator<Item = Vec<u8>>,
{
    let mut sent = 0;
    for element in chain {
        out.write_all(&element)
            .await
            .map_err(|e| TuneError::Transport(format!("response write failed: {e}")))?;
        sent += 1;
    }
    out.flush()
        .await
        .map_err(|e| TuneError::Transport(format!("response flush failed: {e}")))?;
    Ok(sent)
}
