//! Packet batching.
//!
//! Encoded metrics are newline delimited, which means that multiple metrics can be sent in a single packet and then
//! trivially split apart by the remote server. Batching them saves on the number of system calls required to send the
//! metrics over the network, ultimately making writes more efficient.
//!
//! A packet is cut whenever the next metric would push it past the maximum packet size, or when the flush timer fires,
//! whichever happens first.

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    error::{report, Error, ErrorHandler},
    pool::{BufferPool, PooledBuffer},
    stats::Stats,
    transport::Transport,
};

struct BatchState {
    packet: PooledBuffer,
    transport: Box<dyn Transport>,
    closed: bool,
}

/// Accumulates encoded metrics into packets and hands finished packets to the transport.
///
/// All mutable state sits behind a single lock, taken by every enqueue and every flush, timer-driven or not. A flush
/// that happens as part of an enqueue writes to the transport while holding the lock, so enqueueing can block for as
/// long as the transport's write timeout.
///
/// Errors are handed to the error handler after the lock has been released, so handlers are free to call back into the
/// client.
pub(crate) struct Batcher {
    state: Mutex<BatchState>,
    pool: Arc<BufferPool>,
    max_packet_size: usize,
    error_handler: Option<ErrorHandler>,
    stats: Arc<Stats>,
}

impl Batcher {
    pub fn new(
        transport: Box<dyn Transport>,
        pool: Arc<BufferPool>,
        max_packet_size: usize,
        error_handler: Option<ErrorHandler>,
        stats: Arc<Stats>,
    ) -> Self {
        let packet = pool.acquire(max_packet_size);

        Self {
            state: Mutex::new(BatchState { packet, transport, closed: false }),
            pool,
            max_packet_size,
            error_handler,
            stats,
        }
    }

    /// Appends an encoded metric to the current packet.
    ///
    /// If the metric does not fit in the remaining space of the current packet, the current packet is flushed first. A
    /// metric that is larger than the maximum packet size by itself is dropped and reported.
    pub fn enqueue(&self, fragment: &[u8]) {
        if fragment.is_empty() {
            return;
        }

        if fragment.len() > self.max_packet_size {
            self.drop_fragment(Error::PacketTooLarge { len: fragment.len(), max_packet_size: self.max_packet_size });
            return;
        }

        let maybe_error = {
            let mut state = self.state.lock();
            if state.closed {
                Some(Error::Closed)
            } else {
                let maybe_error = if state.packet.len() + fragment.len() > self.max_packet_size {
                    self.flush_locked(&mut state)
                } else {
                    None
                };

                state.packet.extend_from_slice(fragment);
                maybe_error
            }
        };

        if let Some(error) = maybe_error {
            if matches!(error, Error::Closed) {
                self.stats.track_fragment_dropped();
            }
            report(self.error_handler.as_ref(), error);
        }
    }

    /// Drops a metric that never made it into a packet, reporting why.
    pub fn drop_fragment(&self, error: Error) {
        self.stats.track_fragment_dropped();
        report(self.error_handler.as_ref(), error);
    }

    /// Flushes the current packet, if it is not empty.
    pub fn flush(&self) {
        let maybe_error = {
            let mut state = self.state.lock();
            self.flush_locked(&mut state)
        };

        if let Some(error) = maybe_error {
            report(self.error_handler.as_ref(), error);
        }
    }

    /// Flushes any pending metrics and closes the transport.
    ///
    /// Calling this more than once is a no-op.
    pub fn close(&self) {
        let maybe_error = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }

            let maybe_error = self.flush_locked(&mut state);
            state.transport.close();
            state.closed = true;
            maybe_error
        };

        debug!("Closed batcher.");

        if let Some(error) = maybe_error {
            report(self.error_handler.as_ref(), error);
        }
    }

    /// Returns the number of bytes in the current packet.
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.state.lock().packet.len()
    }

    fn flush_locked(&self, state: &mut BatchState) -> Option<Error> {
        if state.packet.is_empty() {
            return None;
        }

        // Swap in a fresh buffer so that the finished packet is released back to the pool as soon as it is written.
        let packet = std::mem::replace(&mut state.packet, self.pool.acquire(self.max_packet_size));
        let packet_len = packet.len();

        match state.transport.write(&packet) {
            Ok(()) => {
                trace!(packet_len, "Flushed packet.");
                self.stats.track_packet_send_succeeded(packet_len);
                None
            }
            Err(e) => {
                debug!(error = %e, packet_len, "Failed to write packet.");
                self.stats.track_packet_send_failed(packet_len);
                Some(e)
            }
        }
    }
}

/// Background thread flushing a [`Batcher`] on a fixed period.
pub(crate) struct FlushTimer {
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl FlushTimer {
    /// Spawns the flush thread.
    ///
    /// # Errors
    ///
    /// If the thread cannot be spawned, an error is returned.
    pub fn spawn(batcher: Arc<Batcher>, flush_period: Duration) -> io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let handle = thread::Builder::new()
            .name("metrics-client-statsd-flusher".to_string())
            .spawn(move || run_flush_loop(&batcher, flush_period, &shutdown_rx))?;

        Ok(Self { shutdown_tx, handle })
    }

    /// Returns the ID of the flush thread.
    pub fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// Stops the flush thread, waiting for it to exit.
    pub fn stop(self) {
        drop(self.shutdown_tx);

        // When the last client handle is dropped from an error handler running on the flush thread itself, the thread
        // exits on its own once the handler returns.
        if self.handle.thread().id() == thread::current().id() {
            return;
        }

        if self.handle.join().is_err() {
            debug!("Flush thread panicked.");
        }
    }
}

fn run_flush_loop(batcher: &Batcher, flush_period: Duration, shutdown_rx: &Receiver<()>) {
    debug!(?flush_period, "Starting flush loop.");

    let ticker = tick(flush_period);
    loop {
        select! {
            recv(ticker) -> _ => batcher.flush(),
            recv(shutdown_rx) -> _ => break,
        }
    }

    debug!("Stopped flush loop.");
}
