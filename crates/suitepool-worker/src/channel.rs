//! The worker's end of the JSON-lines channel to its slot.
//!
//! Outgoing messages go through a writer task so callers never block on
//! stdout; incoming messages land in an [`Inbox`]. When stdin closes the
//! inbox closes too, which the roles treat as a shutdown request.
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use suitepool_exec::{MessageReader, MessageWriter};
use suitepool_model::Message;

use crate::{crash::CrashContext, error::WorkerError};

pub type Inbox = mpsc::UnboundedReceiver<Message>;

pub struct ParentChannel {
    outbox: Option<mpsc::UnboundedSender<Message>>,
    writer: Option<JoinHandle<()>>,
    crash: CrashContext,
}

impl ParentChannel {
    /// Channel over the process' own stdin and stdout.
    pub fn stdio(crash: CrashContext) -> (Self, Inbox) {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), crash)
    }

    pub fn new<R, W>(reader: R, writer: W, crash: CrashContext) -> (Self, Inbox)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbox, mut pending) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            let mut writer = MessageWriter::new(writer);
            while let Some(msg) = pending.recv().await {
                if let Err(err) = writer.send(&msg).await {
                    debug!(target: "suitepool.worker", kind = msg.kind(), error = %err, "parent is gone, dropping output");
                    break;
                }
            }
        });

        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reader = MessageReader::new(reader);
            loop {
                match reader.next().await {
                    Ok(Some(Ok(msg))) => {
                        if inbox_tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(Some(Err(line))) => {
                        warn!(target: "suitepool.worker", %line, "ignoring non-protocol input");
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(target: "suitepool.worker", error = %err, "parent channel read failed");
                        break;
                    }
                }
            }
        });

        let channel = Self {
            outbox: Some(outbox),
            writer: Some(writer),
            crash,
        };
        (channel, inbox)
    }

    /// Queue `msg` for the parent.
    ///
    /// After [`detach`](Self::detach) messages are dropped silently.
    pub fn send(&self, msg: Message) -> Result<(), WorkerError> {
        if let Message::TestResults { event } = &msg {
            self.crash.record_event(event);
        }
        match &self.outbox {
            Some(outbox) => outbox.send(msg).map_err(|_| WorkerError::ChannelClosed),
            None => {
                trace!(target: "suitepool.worker", kind = msg.kind(), "detached, dropping message");
                Ok(())
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.outbox.is_some()
    }

    /// Stop forwarding and wait until everything queued so far is written.
    pub async fn detach(&mut self) {
        self.outbox.take();
        if let Some(writer) = self.writer.take()
            && let Err(err) = writer.await
        {
            warn!(target: "suitepool.worker", error = %err, "writer task failed");
        }
    }
}
