//! Pipelined transport over one socket.
//!
//! A writer task owns the write half and serializes whole frames, so two
//! commands never interleave on the wire; it registers each command's
//! pending-reply entry right after writing its frame, so the reply queue
//! order always equals the write order. A reader task owns the read half
//! and completes pending entries one at a time: a whole reply is decoded
//! before the next entry is looked at, so one command's multi-field reply
//! can never interleave with another's.
//!
//! Handing a command to the writer is a single non-blocking channel send.
//! A caller dropping its future therefore either cancels the command before
//! anything was written, or leaves a fully registered command whose reply
//! the reader consumes and discards; the stream stays aligned either way.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Decoder;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::reply::{Reply, ReplyDecoder, ReplyShape};

const READ_CHUNK: usize = 8 * 1024;

pub(crate) struct Transport {
    commands: mpsc::UnboundedSender<Command>,
}

struct Command {
    frame: Vec<u8>,
    /// Present for every command that produces a reply.
    reply: Option<Pending>,
    /// Present for fire-and-forget commands, completed once the frame is
    /// written.
    written: Option<oneshot::Sender<Result<()>>>,
}

struct Pending {
    shape: ReplyShape,
    done: oneshot::Sender<Result<Reply>>,
}

impl Transport {
    /// Split the stream and spawn the writer and reader tasks.
    pub(crate) fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(write_half, command_rx, pending_tx));
        tokio::spawn(read_replies(read_half, pending_rx));
        Self {
            commands: command_tx,
        }
    }

    /// Send one frame and await its decoded reply.
    ///
    /// The returned future may be dropped at any point: the reader task
    /// still consumes the reply bytes to keep the stream aligned and
    /// discards them.
    pub(crate) async fn round_trip(&self, frame: Vec<u8>, shape: ReplyShape) -> Result<Reply> {
        let (done, reply_rx) = oneshot::channel();
        self.commands
            .send(Command {
                frame,
                reply: Some(Pending { shape, done }),
                written: None,
            })
            .map_err(|_| Error::ConnectionLost)?;
        match reply_rx.await {
            Ok(outcome) => outcome,
            // The transport shut down without completing the entry.
            Err(_) => Err(Error::ConnectionLost),
        }
    }

    /// Send one frame for a command that never produces a reply (PUTNR).
    /// Resolves as soon as the frame is on the wire.
    pub(crate) async fn fire_and_forget(&self, frame: Vec<u8>) -> Result<()> {
        let (written, written_rx) = oneshot::channel();
        self.commands
            .send(Command {
                frame,
                reply: None,
                written: Some(written),
            })
            .map_err(|_| Error::ConnectionLost)?;
        match written_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ConnectionLost),
        }
    }
}

/// Writer task: one frame at a time, in submission order.
async fn write_frames<W: AsyncWrite + Send + Unpin>(
    mut writer: W,
    mut commands: mpsc::UnboundedReceiver<Command>,
    pending_tx: mpsc::UnboundedSender<Pending>,
) {
    while let Some(command) = commands.recv().await {
        let result = async {
            writer.write_all(&command.frame).await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        }
        .await;
        if let Err(e) = result {
            debug!("writer task stopping: write error");
            fail_command(command, Error::Io(e));
            return;
        }
        trace!(len = command.frame.len(), "frame written");
        if let Some(written) = command.written {
            let _ = written.send(Ok(()));
        }
        if let Some(pending) = command.reply
            && pending_tx.send(pending).is_err()
        {
            // The reader is gone; nothing will ever complete this entry.
            debug!("writer task stopping: reader gone");
            return;
        }
    }
    // Transport dropped: let the reader drain what is already queued.
}

fn fail_command(command: Command, error: Error) {
    if let Some(written) = command.written {
        let _ = written.send(Err(error));
    } else if let Some(Pending { done, .. }) = command.reply {
        let _ = done.send(Err(error));
    }
}

/// Reader task: completes pending entries strictly in queue order.
async fn read_replies<R: AsyncRead + Send + Unpin>(
    mut reader: R,
    mut pending: mpsc::UnboundedReceiver<Pending>,
) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    while let Some(Pending { shape, done }) = pending.recv().await {
        let mut decoder = ReplyDecoder::new(shape);
        let outcome = loop {
            match decoder.decode(&mut buf) {
                Ok(Some(Ok(reply))) => break Ok(reply),
                Ok(Some(Err(code))) => break Err(Error::Server(code)),
                Ok(None) => {
                    buf.reserve(READ_CHUNK);
                    match reader.read_buf(&mut buf).await {
                        Ok(0) => {
                            // EOF before the reply started is an orderly
                            // close; EOF inside a reply leaves the stream
                            // unrecoverable.
                            break Err(if decoder.is_fresh() && buf.is_empty() {
                                Error::ConnectionLost
                            } else {
                                Error::Decode("connection closed mid-reply".to_string())
                            });
                        }
                        Ok(_) => {}
                        Err(e) => break Err(Error::Io(e)),
                    }
                }
                Err(e) => break Err(e),
            }
        };
        let poisoned = matches!(&outcome, Err(e) if e.poisons_connection());
        if done.send(outcome).is_err() {
            // Caller went away; the reply bytes were consumed regardless.
            trace!("reply discarded");
        }
        if poisoned {
            debug!("reader task stopping: connection poisoned");
            return;
        }
    }
}
