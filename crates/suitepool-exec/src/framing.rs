//! JSON-lines framing of [`Message`]s over byte streams.
//!
//! One message per line, in both directions. Lines that do not decode are
//! reported by the reader and skipped, so stray output can not break the
//! channel.
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};

use suitepool_model::Message;

use crate::error::ExecResult;

pub struct MessageReader<R> {
    lines: Lines<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            lines: BufReader::new(inner).lines(),
        }
    }

    /// Next line, decoded. `Ok(None)` at end of stream.
    ///
    /// Blank lines are skipped; an undecodable line yields
    /// `Ok(Some(Err(line)))`.
    pub async fn next(&mut self) -> ExecResult<Option<Result<Message, String>>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(Message::from_line(&line).map_err(|_| line)));
        }
    }
}

pub struct MessageWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write and flush one message.
    pub async fn send(&mut self, msg: &Message) -> ExecResult<()> {
        let line = msg.to_line()?;
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> ExecResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suitepool_model::SuiteRef;

    #[tokio::test]
    async fn writer_and_reader_agree() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = MessageWriter::new(client);
        let mut reader = MessageReader::new(server);

        writer.send(&Message::ReadyForTests).await.unwrap();
        writer
            .send(&Message::SuiteDone {
                suite: SuiteRef::new("a.t"),
            })
            .await
            .unwrap();
        drop(writer);

        assert_eq!(reader.next().await.unwrap(), Some(Ok(Message::ReadyForTests)));
        assert_eq!(
            reader.next().await.unwrap(),
            Some(Ok(Message::SuiteDone {
                suite: SuiteRef::new("a.t")
            }))
        );
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stray_lines_are_surfaced_not_fatal() {
        let input: &[u8] = b"\nhello from a test\n{\"type\":\"readyForTests\"}\n";
        let mut reader = MessageReader::new(input);

        assert_eq!(
            reader.next().await.unwrap(),
            Some(Err("hello from a test".to_string()))
        );
        assert_eq!(reader.next().await.unwrap(), Some(Ok(Message::ReadyForTests)));
        assert_eq!(reader.next().await.unwrap(), None);
    }
}
