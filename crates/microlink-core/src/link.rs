use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::encoding::decode_text;
use crate::frame;
use crate::transport::{SerialTransport, Transport};
use crate::{LinkError, Result};

/// Sentinel returned by [`MicrobitLink::send_and_receive`] when the device
/// stayed silent for the whole wait window.
pub const NO_RESPONSE: &str = "[no response]";

/// Serial session parameters. `..Default::default()` fills in the usual
/// micro:bit settings (115 200 baud, 1 s read timeout).
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115_200,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// Fixed link timings, one place instead of bare numbers at every sleep.
#[derive(Debug, Clone)]
pub(crate) struct Timing {
    /// Settle delay after opening: the micro:bit resets when the host opens
    /// the port and needs time before it accepts traffic.
    pub(crate) connect_settle: Duration,
    /// Settle delay after a fire-and-forget write.
    pub(crate) send_settle: Duration,
    /// Pause between listener polls of the input side.
    pub(crate) poll_interval: Duration,
    /// Pause between reads while a frame is accumulating.
    pub(crate) idle_poll: Duration,
    /// Idle polls after which an accumulating frame is complete.
    pub(crate) max_idle_polls: u32,
    /// Hard bound on how long a single frame may keep accumulating.
    pub(crate) reassembly_cap: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            connect_settle: Duration::from_secs(2),
            send_settle: Duration::from_millis(50),
            poll_interval: Duration::from_millis(100),
            idle_poll: Duration::from_millis(50),
            max_idle_polls: 20,
            reassembly_cap: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
impl Timing {
    pub(crate) fn fast() -> Self {
        Self {
            connect_settle: Duration::ZERO,
            send_settle: Duration::from_millis(1),
            poll_interval: Duration::from_millis(10),
            idle_poll: Duration::from_millis(5),
            max_idle_polls: 4,
            reassembly_cap: Duration::from_millis(150),
        }
    }
}

type Callback = Box<dyn Fn(String) + Send>;

enum Command {
    Exchange {
        message: String,
        wait: Duration,
        reply: Sender<String>,
    },
    Send {
        text: String,
        reply: Sender<bool>,
    },
    Listen(Callback),
    Close,
}

/// One open port and the worker thread that exclusively owns it.
struct Session {
    port_name: String,
    tx_cmd: Sender<Command>,
    open: Arc<AtomicBool>,
    listening: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    fn spawn(transport: Box<dyn Transport>, port_name: String, timing: Timing) -> Self {
        let (tx_cmd, rx_cmd) = unbounded();
        let open = Arc::new(AtomicBool::new(true));
        let listening = Arc::new(AtomicBool::new(false));

        let worker = {
            let open = open.clone();
            let listening = listening.clone();
            thread::spawn(move || run_worker(transport, rx_cmd, open, listening, timing))
        };

        Self {
            port_name,
            tx_cmd,
            open,
            listening,
            worker: Some(worker),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.listening.store(false, Ordering::SeqCst);
        let _ = self.tx_cmd.send(Command::Close);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// The serial link manager: owns at most one session to a micro:bit-class
/// device at a time.
///
/// Every method takes `&self`, so a handle behind an `Arc` can be shared
/// between a UI thread and a listener callback. All port I/O runs on the
/// session's worker thread; foreground calls are messages to it, which keeps
/// sends and listener reads from ever touching the port concurrently.
pub struct MicrobitLink {
    session: Mutex<Option<Session>>,
}

impl MicrobitLink {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
        }
    }

    /// Open `port` with default settings, replacing any open session.
    pub fn connect(&self, port: &str) -> Result<String> {
        self.connect_with(LinkConfig {
            port_name: port.to_string(),
            ..Default::default()
        })
    }

    /// Open the configured port, replacing any open session.
    ///
    /// Any previous session is torn down first, even when the new open then
    /// fails. Blocks for the firmware settle delay after a successful open.
    /// Returns the resolved device identifier.
    pub fn connect_with(&self, config: LinkConfig) -> Result<String> {
        self.connect_inner(config, Timing::default())
    }

    fn connect_inner(&self, config: LinkConfig, timing: Timing) -> Result<String> {
        // Tear down any previous session before touching the new port.
        self.disconnect();

        let transport = SerialTransport::open(&config)?;
        let port_name = transport.name().unwrap_or_else(|| config.port_name.clone());
        thread::sleep(timing.connect_settle);

        *self.session.lock() = Some(Session::spawn(
            Box::new(transport),
            port_name.clone(),
            timing,
        ));
        Ok(port_name)
    }

    /// Close the session if one is open. Safe to call repeatedly.
    pub fn disconnect(&self) {
        // Joining the worker must happen outside the lock: a listener
        // callback may still be running and calling back into the handle.
        let session = self.session.lock().take();
        if let Some(session) = session {
            log::info!("disconnecting from {}", session.port_name);
            drop(session);
        }
    }

    /// Whether a session exists and its worker is still running.
    pub fn is_connected(&self) -> bool {
        self.session.lock().as_ref().map_or(false, Session::is_open)
    }

    /// One blocking round trip: clear stale input, send `message` as a
    /// CRLF-terminated line, wait `wait`, read one line.
    ///
    /// Returns the trimmed reply, [`NO_RESPONSE`] when the device stayed
    /// silent (or replied with only whitespace), or a bracketed error
    /// sentinel when I/O failed mid-exchange. Fails only when no session is
    /// open, in which case no I/O is attempted.
    pub fn send_and_receive(&self, message: &str, wait: Duration) -> Result<String> {
        let tx_cmd = self.command_sender()?;
        let (reply_tx, reply_rx) = bounded(1);
        tx_cmd
            .send(Command::Exchange {
                message: message.to_string(),
                wait,
                reply: reply_tx,
            })
            .map_err(|_| LinkError::NotConnected)?;
        reply_rx.recv().map_err(|_| LinkError::NotConnected)
    }

    /// Fire-and-forget: send `text`, trimmed and CRLF-terminated.
    ///
    /// `false` when no session is open or the write failed; never panics.
    pub fn send_text(&self, text: &str) -> bool {
        let Ok(tx_cmd) = self.command_sender() else {
            return false;
        };
        let (reply_tx, reply_rx) = bounded(1);
        if tx_cmd
            .send(Command::Send {
                text: text.to_string(),
                reply: reply_tx,
            })
            .is_err()
        {
            return false;
        }
        reply_rx.recv().unwrap_or(false)
    }

    /// Start delivering reassembled frames to `callback`.
    ///
    /// The callback runs on the worker thread: re-dispatch to your own
    /// context if you need to, and do not call the blocking link methods
    /// from inside it. Calling this again replaces the callback. `false`
    /// when no session is open.
    pub fn start_listening<F>(&self, callback: F) -> bool
    where
        F: Fn(String) + Send + 'static,
    {
        let slot = self.session.lock();
        let Some(session) = slot.as_ref().filter(|s| s.is_open()) else {
            return false;
        };
        if session
            .tx_cmd
            .send(Command::Listen(Box::new(callback)))
            .is_err()
        {
            return false;
        }
        session.listening.store(true, Ordering::SeqCst);
        log::debug!("listener started on {}", session.port_name);
        true
    }

    /// Stop the listener. Observed within about one poll interval; a frame
    /// already being reassembled still completes and is delivered.
    pub fn stop_listening(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            session.listening.store(false, Ordering::SeqCst);
        }
    }

    fn command_sender(&self) -> Result<Sender<Command>> {
        let slot = self.session.lock();
        match slot.as_ref() {
            Some(session) if session.is_open() => Ok(session.tx_cmd.clone()),
            _ => Err(LinkError::NotConnected),
        }
    }
}

impl Default for MicrobitLink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl MicrobitLink {
    pub(crate) fn with_transport(transport: Box<dyn Transport>, timing: Timing) -> Self {
        let name = transport.name().unwrap_or_else(|| "test".to_string());
        let session = Session::spawn(transport, name, timing);
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

fn run_worker(
    mut transport: Box<dyn Transport>,
    rx_cmd: Receiver<Command>,
    open: Arc<AtomicBool>,
    listening: Arc<AtomicBool>,
    timing: Timing,
) {
    let mut callback: Option<Callback> = None;

    loop {
        match rx_cmd.recv_timeout(timing.poll_interval) {
            Ok(Command::Exchange {
                message,
                wait,
                reply,
            }) => {
                let _ = reply.send(exchange(transport.as_mut(), &message, wait));
            }
            Ok(Command::Send { text, reply }) => {
                let _ = reply.send(send_line(transport.as_mut(), &text, timing.send_settle));
            }
            Ok(Command::Listen(cb)) => callback = Some(cb),
            Ok(Command::Close) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if !listening.load(Ordering::SeqCst) {
                    continue;
                }
                let Some(cb) = callback.as_ref() else {
                    continue;
                };
                match poll_frame(transport.as_mut(), &timing) {
                    Ok(Some(text)) => cb(text),
                    Ok(None) => {}
                    Err(e) => {
                        log::warn!("listener read failed, stopping listener: {e}");
                        listening.store(false, Ordering::SeqCst);
                    }
                }
            }
        }
    }

    open.store(false, Ordering::SeqCst);
    log::debug!("serial worker stopped");
}

fn poll_frame(transport: &mut dyn Transport, timing: &Timing) -> Result<Option<String>> {
    if transport.available()? == 0 {
        return Ok(None);
    }
    frame::collect_frame(transport, timing)
}

fn exchange(transport: &mut dyn Transport, message: &str, wait: Duration) -> String {
    match try_exchange(transport, message, wait) {
        Ok(line) => line,
        Err(e) => format!("[error: {e}]"),
    }
}

fn try_exchange(transport: &mut dyn Transport, message: &str, wait: Duration) -> Result<String> {
    transport.clear_input()?;
    transport.write_all(format!("{message}\r\n").as_bytes())?;
    thread::sleep(wait);

    if transport.available()? == 0 {
        return Ok(NO_RESPONSE.to_string());
    }

    let line = read_line(transport)?;
    let line = line.trim();
    Ok(if line.is_empty() {
        NO_RESPONSE.to_string()
    } else {
        line.to_string()
    })
}

fn read_line(transport: &mut dyn Transport) -> Result<String> {
    let mut raw = Vec::new();
    loop {
        let available = transport.available()?;
        if available == 0 {
            break;
        }
        let mut chunk = vec![0u8; available];
        let n = transport.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);
        if raw.contains(&b'\n') {
            break;
        }
    }

    let end = raw.iter().position(|&b| b == b'\n').unwrap_or(raw.len());
    Ok(decode_text(&raw[..end]))
}

fn send_line(transport: &mut dyn Transport, text: &str, settle: Duration) -> bool {
    match try_send(transport, text, settle) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("send failed: {e}");
            false
        }
    }
}

fn try_send(transport: &mut dyn Transport, text: &str, settle: Duration) -> Result<()> {
    transport.clear_input()?;
    transport.write_all(format!("{}\r\n", text.trim()).as_bytes())?;
    transport.flush()?;
    thread::sleep(settle);
    Ok(())
}
