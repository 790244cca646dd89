//! The connection core: binds the frame codec, extension pipeline, state
//! machine, and reassembler to a split duplex stream.
//!
//! Two tasks run per connection. The reader parses frames, routes control
//! frames through the state machine, and delivers reassembled messages to
//! the inbound channel. The writer is the single consumer of a command
//! channel fed by user writes and by control frames the reader schedules
//! (pong, auto-ping, close); a single queue keeps frames in submission
//! order and lets a pong interleave between user messages without ever
//! splitting a frame. The auto-ping timer shares the reader's task.

use std::sync::{Arc, Mutex};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::AutoPing;
use crate::connection::fragmenter::Fragmenter;
use crate::connection::state::{Action, Input, StateMachine};
use crate::error::{Error, Result};
use crate::extensions::{ExtensionPipeline, RsvBits};
use crate::message::{CloseFrame, Message};
use crate::protocol::frame::{parse_header, FrameHeader, MAX_CONTROL_PAYLOAD};
use crate::protocol::mask::generate_mask_key;
use crate::protocol::{decode_close, encode_close, Frame, MessageReassembler, OpCode};

const COMMAND_QUEUE_DEPTH: usize = 32;
const MESSAGE_QUEUE_DEPTH: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Reads frames off the transport's read half.
///
/// The internal buffer is the resumable carrier for partial frames; header
/// invariants (masking, RSV ownership, frame size) are enforced as soon as
/// the header is decodable, before the payload finishes arriving.
pub(crate) struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    max_frame_size: usize,
    allowed_rsv: RsvBits,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(io: R, leftover: BytesMut, max_frame_size: usize, allowed_rsv: RsvBits) -> Self {
        Self {
            io,
            buf: leftover,
            max_frame_size,
            allowed_rsv,
        }
    }

    fn check_header(&self, header: &FrameHeader) -> Result<()> {
        if header.mask.is_some() {
            return Err(Error::MaskedFrameFromServer);
        }
        // RSV bits are legal only where an active extension owns them;
        // control frames included, so an extension that claims a bit for
        // its control traffic is honored.
        if !self
            .allowed_rsv
            .covers(header.rsv1, header.rsv2, header.rsv3)
        {
            return Err(Error::ReservedBitsSet);
        }
        if header.opcode.is_control() {
            if header.payload_len > MAX_CONTROL_PAYLOAD {
                return Err(Error::ControlFrameTooLarge(header.payload_len));
            }
            if !header.fin {
                return Err(Error::FragmentedControlFrame);
            }
        }
        if header.payload_len > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: header.payload_len,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Await the next complete frame.
    pub(crate) async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if self.buf.len() >= 2 {
                match parse_header(&self.buf) {
                    Ok(header) => {
                        self.check_header(&header)?;
                        match Frame::parse(&self.buf) {
                            Ok((frame, consumed)) => {
                                self.buf.advance(consumed);
                                return Ok(frame);
                            }
                            Err(Error::IncompleteFrame { .. }) => {}
                            Err(e) => return Err(e),
                        }
                    }
                    Err(Error::IncompleteFrame { .. }) => {}
                    Err(e) => return Err(e),
                }
            }

            let n = self.io.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed(None));
            }
        }
    }
}

/// Writes masked frames to the transport's write half.
pub(crate) struct FrameWriter<W> {
    io: W,
    scratch: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub(crate) fn new(io: W) -> Self {
        Self {
            io,
            scratch: Vec::new(),
        }
    }

    /// Mask with a fresh key and write the frame.
    pub(crate) async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let key = generate_mask_key()?;
        let size = frame.wire_size(true);
        self.scratch.clear();
        self.scratch.resize(size, 0);
        let written = frame.write(&mut self.scratch, Some(key))?;
        self.io.write_all(&self.scratch[..written]).await?;
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }
}

/// Writer-task commands. User writes and reader-scheduled control frames
/// share one queue, which fixes the wire order.
#[derive(Debug)]
pub(crate) enum Command {
    Message(Message),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(CloseFrame),
}

/// Outbound writer handle passed to the connection handler.
///
/// Cloneable; all clones feed the same ordered queue. After the close
/// handshake starts, sends fail with `Error::ConnectionClosed`.
#[derive(Clone)]
pub struct MessageWriter {
    tx: mpsc::Sender<Command>,
    state: Arc<Mutex<StateMachine>>,
}

impl MessageWriter {
    /// Send a data message.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` once the connection is closing or closed.
    pub async fn send(&self, message: Message) -> Result<()> {
        if !lock(&self.state).is_open() {
            return Err(Error::ConnectionClosed(None));
        }
        self.tx
            .send(Command::Message(message))
            .await
            .map_err(|_| Error::ConnectionClosed(None))
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into())).await
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_binary(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Binary(data.into())).await
    }

    /// Send a ping with an application payload.
    ///
    /// # Errors
    ///
    /// `Error::ControlFrameTooLarge` past 125 bytes, otherwise as
    /// [`send`](Self::send).
    pub async fn ping(&self, data: Vec<u8>) -> Result<()> {
        if data.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(data.len()));
        }
        if !lock(&self.state).is_open() {
            return Err(Error::ConnectionClosed(None));
        }
        self.tx
            .send(Command::Ping(data))
            .await
            .map_err(|_| Error::ConnectionClosed(None))
    }

    /// Send an unsolicited pong.
    ///
    /// # Errors
    ///
    /// `Error::ControlFrameTooLarge` past 125 bytes, otherwise as
    /// [`send`](Self::send).
    pub async fn pong(&self, data: Vec<u8>) -> Result<()> {
        if data.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(data.len()));
        }
        if !lock(&self.state).is_open() {
            return Err(Error::ConnectionClosed(None));
        }
        self.tx
            .send(Command::Pong(data))
            .await
            .map_err(|_| Error::ConnectionClosed(None))
    }

    /// Initiate the close handshake. A no-op when already closing.
    ///
    /// # Errors
    ///
    /// `Error::InvalidCloseCode` for codes that must not go on the wire.
    pub async fn close(&self, frame: CloseFrame) -> Result<()> {
        if !frame.code.is_sendable() {
            return Err(Error::InvalidCloseCode(frame.code.as_u16()));
        }
        let action = lock(&self.state).step(Input::Close(frame))?;
        if let Action::SendClose(frame) = action {
            // A dropped writer task means the close frame already went out.
            let _ = self.tx.send(Command::Close(frame)).await;
        }
        Ok(())
    }

    /// Whether user writes are currently accepted.
    #[must_use]
    pub fn is_open(&self) -> bool {
        lock(&self.state).is_open()
    }
}

/// The inbound message stream passed to the connection handler.
///
/// Single-consumer and finite: it ends when the connection reaches the
/// closed state or the transport fails. A protocol or transport error is
/// delivered as the final `Err` item.
pub struct MessageStream {
    rx: mpsc::Receiver<Result<Message>>,
}

impl MessageStream {
    /// Await the next message. `None` once the connection has closed.
    pub async fn next(&mut self) -> Option<Result<Message>> {
        self.rx.recv().await
    }
}

/// Everything `connect` needs to drive a live connection.
pub(crate) struct ConnectionHandles {
    pub(crate) stream: MessageStream,
    pub(crate) writer: MessageWriter,
    pub(crate) reader_task: JoinHandle<Result<Option<CloseFrame>>>,
    pub(crate) writer_task: JoinHandle<Result<()>>,
}

pub(crate) struct CoreConfig {
    pub(crate) max_frame_size: usize,
    pub(crate) max_message_size: usize,
    pub(crate) validate_utf8: bool,
    pub(crate) auto_ping: AutoPing,
}

/// Split the upgraded stream and spawn the reader and writer tasks.
pub(crate) fn spawn<S>(
    stream: S,
    leftover: BytesMut,
    pipeline: ExtensionPipeline,
    config: CoreConfig,
) -> ConnectionHandles
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let allowed_rsv = pipeline.claimed_rsv();
    let (read_half, write_half) = tokio::io::split(stream);

    let state = Arc::new(Mutex::new(StateMachine::new(config.auto_ping.period())));
    let pipeline = Arc::new(Mutex::new(pipeline));

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_QUEUE_DEPTH);

    let reader = FrameReader::new(read_half, leftover, config.max_frame_size, allowed_rsv);
    let writer = FrameWriter::new(write_half);

    let reader_task = tokio::spawn(read_loop(
        reader,
        Arc::clone(&pipeline),
        Arc::clone(&state),
        MessageReassembler::new(config.max_message_size, config.validate_utf8),
        msg_tx,
        cmd_tx.clone(),
        config.auto_ping,
        config.validate_utf8,
    ));
    let writer_task = tokio::spawn(write_loop(
        writer,
        pipeline,
        cmd_rx,
        config.max_frame_size,
    ));

    ConnectionHandles {
        stream: MessageStream { rx: msg_rx },
        writer: MessageWriter {
            tx: cmd_tx,
            state,
        },
        reader_task,
        writer_task,
    }
}

/// Turn an assembled (still extension-encoded) message into the
/// user-visible form.
fn finish_message(
    assembled: crate::protocol::AssembledMessage,
    pipeline: &Mutex<ExtensionPipeline>,
    validate_utf8: bool,
) -> Result<Message> {
    let (opcode, payload) = if assembled.compressed {
        let mut whole = Frame::new(true, assembled.opcode, assembled.payload);
        whole.rsv1 = true;
        lock(pipeline).decode(&mut whole)?;
        (whole.opcode, whole.payload)
    } else {
        (assembled.opcode, assembled.payload)
    };

    match opcode {
        OpCode::Text => {
            if validate_utf8 {
                let text = String::from_utf8(payload).map_err(|_| Error::InvalidUtf8)?;
                Ok(Message::Text(text))
            } else {
                // Validation off: decode permissively rather than failing.
                Ok(Message::Text(
                    String::from_utf8_lossy(&payload).into_owned(),
                ))
            }
        }
        OpCode::Binary => Ok(Message::Binary(payload)),
        other => Err(Error::ProtocolViolation(format!(
            "assembled message with opcode {}",
            other
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
async fn read_loop<R>(
    mut reader: FrameReader<R>,
    pipeline: Arc<Mutex<ExtensionPipeline>>,
    state: Arc<Mutex<StateMachine>>,
    mut assembler: MessageReassembler,
    msg_tx: mpsc::Sender<Result<Message>>,
    cmd_tx: mpsc::Sender<Command>,
    auto_ping: AutoPing,
    validate_utf8: bool,
) -> Result<Option<CloseFrame>>
where
    R: AsyncRead + Unpin,
{
    let mut ticker = auto_ping.period().map(|period| {
        let mut interval =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let next = tokio::select! {
            // Inbound frames take priority so a pong already buffered is
            // processed before the tick that would count it late.
            biased;
            frame = reader.next_frame() => frame,
            _ = async {
                match ticker.as_mut() {
                    Some(interval) => interval.tick().await,
                    None => std::future::pending().await,
                }
            }, if ticker.is_some() => {
                // Bind before matching so the state guard is not held
                // across the awaits below.
                let tick_action = lock(&state).step(Input::PingTick)?;
                match tick_action {
                    Action::SendPing(nonce) => {
                        log::trace!("auto-ping");
                        let _ = cmd_tx.send(Command::Ping(nonce.to_vec())).await;
                    }
                    Action::Wait => {}
                    Action::Stop => ticker = None,
                    Action::CloseConnection(code) => {
                        let err = Error::PingTimeout;
                        let action =
                            lock(&state).step(Input::Close(CloseFrame::new(code)))?;
                        if let Action::SendClose(frame) = action {
                            let _ = cmd_tx.send(Command::Close(frame)).await;
                        }
                        let _ = msg_tx.send(Err(err.clone())).await;
                        return Err(err);
                    }
                    action => {
                        debug_assert!(false, "unexpected ping action: {:?}", action);
                    }
                }
                continue;
            }
        };

        let frame = match next {
            Ok(frame) => frame,
            Err(e) => return fail(e, &state, &msg_tx, &cmd_tx).await,
        };

        match frame.opcode {
            OpCode::Ping => {
                let action = lock(&state).step(Input::ReceivedPing(frame.payload))?;
                if let Action::SendPong(data) = action {
                    let _ = cmd_tx.send(Command::Pong(data)).await;
                }
            }
            OpCode::Pong => {
                lock(&state).step(Input::ReceivedPong(frame.payload))?;
            }
            OpCode::Close => {
                let close = match decode_close(&frame.payload) {
                    Ok(close) => close,
                    Err(e) => return fail(e, &state, &msg_tx, &cmd_tx).await,
                };
                let action = lock(&state).step(Input::ReceivedClose(close))?;
                if let Action::SendClose(echo) = action {
                    let _ = cmd_tx.send(Command::Close(echo)).await;
                }
                return Ok(lock(&state).close_frame().cloned());
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                let assembled = match assembler.push(frame) {
                    Ok(assembled) => assembled,
                    Err(e) => return fail(e, &state, &msg_tx, &cmd_tx).await,
                };
                if let Some(assembled) = assembled {
                    match finish_message(assembled, &pipeline, validate_utf8) {
                        Ok(message) => {
                            // The user may have dropped the stream early;
                            // keep reading for the close handshake.
                            let _ = msg_tx.send(Ok(message)).await;
                        }
                        Err(e) => return fail(e, &state, &msg_tx, &cmd_tx).await,
                    }
                }
            }
        }
    }
}

/// Error epilogue for the reader: protocol and data errors start a local
/// close with the mapped code; transport errors end the stream as-is. The
/// error also terminates the inbound stream as its final item.
async fn fail(
    error: Error,
    state: &Mutex<StateMachine>,
    msg_tx: &mpsc::Sender<Result<Message>>,
    cmd_tx: &mpsc::Sender<Command>,
) -> Result<Option<CloseFrame>> {
    if error.is_transport() {
        if lock(state).is_closed() {
            // Peer tore the stream down after a completed close handshake.
            return Ok(lock(state).close_frame().cloned());
        }
        log::debug!("transport failed: {}", error);
    } else {
        log::debug!("closing after local error: {}", error);
        let close = CloseFrame::new(error.close_code());
        let action = lock(state).step(Input::Close(close))?;
        if let Action::SendClose(frame) = action {
            let _ = cmd_tx.send(Command::Close(frame)).await;
        }
    }
    let _ = msg_tx.send(Err(error.clone())).await;
    Err(error)
}

async fn write_loop<W>(
    mut writer: FrameWriter<W>,
    pipeline: Arc<Mutex<ExtensionPipeline>>,
    mut rx: mpsc::Receiver<Command>,
    max_frame_size: usize,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            Command::Message(message) => {
                let opcode = if message.is_text() {
                    OpCode::Text
                } else {
                    OpCode::Binary
                };
                let payload = match message {
                    Message::Text(text) => text.into_bytes(),
                    Message::Binary(data) => data,
                };

                let mut whole = Frame::new(true, opcode, payload);
                lock(&pipeline).encode(&mut whole)?;

                if whole.payload.len() > max_frame_size {
                    for fragment in Fragmenter::new(whole, max_frame_size) {
                        writer.write_frame(&fragment).await?;
                    }
                } else {
                    writer.write_frame(&whole).await?;
                }
                writer.flush().await?;
            }
            Command::Ping(data) => {
                writer.write_frame(&Frame::ping(data)).await?;
                writer.flush().await?;
            }
            Command::Pong(data) => {
                writer.write_frame(&Frame::pong(data)).await?;
                writer.flush().await?;
            }
            Command::Close(frame) => {
                let payload = encode_close(&frame)?;
                writer.write_frame(&Frame::close(payload)).await?;
                writer.flush().await?;
                // Nothing may follow a close frame on the wire.
                break;
            }
        }
    }
    Ok(())
}
